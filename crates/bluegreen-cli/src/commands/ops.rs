use anyhow::bail;

use bluegreen_core::Environment;
use bluegreen_switch::Switcher;

pub async fn deploy(switcher: &Switcher, env: Environment, tag: &str) -> anyhow::Result<()> {
    let record = switcher.deploy(env, tag).await?;
    println!(
        "✓ {env} running {} ({}/{} ready)",
        record.image, record.ready_replicas, record.replicas
    );
    Ok(())
}

pub async fn switch(switcher: &Switcher, env: Environment, force: bool) -> anyhow::Result<()> {
    let outcome = switcher.switch(env, force).await?;
    if outcome.changed {
        println!("✓ Traffic switched to {env} (revision {})", outcome.revision);
    } else {
        println!("✓ {env} is already active");
    }
    Ok(())
}

pub async fn test(switcher: &Switcher, env: Environment) -> anyhow::Result<()> {
    let verdict = switcher.test(env).await?;
    for step in &verdict.steps {
        let mark = if step.result.is_healthy() { "✓" } else { "✗" };
        println!("{mark} GET {}{}: {}", verdict.address, step.path, step.result);
    }
    if !verdict.healthy {
        bail!("{env} is unhealthy: {}", verdict.summary());
    }
    println!("✓ {env} is healthy");
    Ok(())
}

pub async fn rollback(switcher: &Switcher) -> anyhow::Result<()> {
    let outcome = switcher.rollback().await?;
    println!(
        "✓ Rolled back to {} (revision {})",
        outcome.to, outcome.revision
    );
    Ok(())
}

pub async fn scale(switcher: &Switcher, env: Environment, replicas: u32) -> anyhow::Result<()> {
    switcher.scale(env, replicas).await?;
    println!("✓ {env} scaled to {replicas} replicas");
    Ok(())
}

pub async fn release(switcher: &Switcher, tag: &str) -> anyhow::Result<()> {
    let release = switcher.release(tag).await?;
    println!(
        "✓ Released {} to {}; {} scaled down to {}",
        release.tag,
        release.to,
        release.from,
        switcher.config().release.scale_down_replicas
    );
    Ok(())
}

pub async fn bootstrap(switcher: &Switcher) -> anyhow::Result<()> {
    let manifests = switcher.bootstrap().await?;
    for manifest in &manifests {
        println!("✓ {}/{}", manifest.kind.as_str(), manifest.name);
    }
    Ok(())
}
