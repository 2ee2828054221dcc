use bluegreen_cluster::manifest::{self, Manifest};
use bluegreen_core::{BgConfig, Environment};

/// Print the manifests for `env`, or the bootstrap set plus both
/// deployments when no environment is given.
pub fn print(config: &BgConfig, env: Option<Environment>, tag: &str) -> anyhow::Result<()> {
    let manifests = render(config, env, tag)?;
    println!("{}", serde_json::to_string_pretty(&manifest::as_list(&manifests))?);
    Ok(())
}

fn render(config: &BgConfig, env: Option<Environment>, tag: &str) -> anyhow::Result<Vec<Manifest>> {
    let image = config.image_for(tag)?;
    let replicas = config.deploy.replicas;
    let manifests = match env {
        Some(env) => vec![
            manifest::render_deployment(config, env, &image, replicas).manifest,
            manifest::render_env_service(config, env),
        ],
        None => {
            let mut all = manifest::render_bootstrap(config, Environment::default());
            for env in Environment::ALL {
                all.push(manifest::render_deployment(config, env, &image, replicas).manifest);
            }
            all
        }
    };
    Ok(manifests)
}
