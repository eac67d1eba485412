use crate::config::LauncherConfig;
use crate::error::LaunchError;
use controller::crds::{Run, RunCommand, RunSpec, DEFAULT_CONFIG_MAP_KEY, WORKSPACE_LABEL};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::info;

fn labels(config: &LauncherConfig) -> BTreeMap<String, String> {
    BTreeMap::from([(WORKSPACE_LABEL.to_string(), config.workspace.clone())])
}

pub fn build_config_map(name: &str, payload: Vec<u8>, config: &LauncherConfig) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels(config)),
            ..Default::default()
        },
        binary_data: Some(BTreeMap::from([(
            DEFAULT_CONFIG_MAP_KEY.to_string(),
            ByteString(payload),
        )])),
        ..Default::default()
    }
}

pub fn build_run(name: &str, command: RunCommand, args: Vec<String>, config: &LauncherConfig) -> Run {
    let mut run = Run::new(
        name,
        RunSpec {
            command,
            args,
            config_map: name.to_string(),
            config_map_key: DEFAULT_CONFIG_MAP_KEY.to_string(),
            handshake: config.interactive,
            handshake_timeout_seconds: config.timeouts.handshake.as_secs(),
        },
    );
    run.metadata.namespace = Some(config.namespace.clone());
    run.metadata.labels = Some(labels(config));
    run
}

/// Create the payload ConfigMap and the run concurrently. Either failure fails
/// the launch; nothing is rolled back. A name collision with an existing run is
/// an admission failure rather than an adoption of the older object.
///
/// When only the ConfigMap is admitted it is left behind without an owner, so
/// garbage collection never reaches it. It still carries the workspace label
/// and can be found and removed with a label selector.
pub async fn submit(client: &Client, config_map: &ConfigMap, run: &Run) -> Result<(), LaunchError> {
    let namespace = run.metadata.namespace.as_deref().unwrap_or("default");
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let runs: Api<Run> = Api::namespaced(client.clone(), namespace);
    let params = PostParams::default();

    let create_config_map = async {
        config_maps
            .create(&params, config_map)
            .await
            .map_err(|source| LaunchError::Admission {
                resource: format!("ConfigMap/{}", config_map.metadata.name.as_deref().unwrap_or_default()),
                source,
            })
    };
    let create_run = async {
        runs.create(&params, run)
            .await
            .map_err(|source| LaunchError::Admission {
                resource: format!("Run/{}", run.metadata.name.as_deref().unwrap_or_default()),
                source,
            })
    };

    tokio::try_join!(create_config_map, create_run)?;

    info!(
        "Created ConfigMap and Run {} in namespace {}",
        run.metadata.name.as_deref().unwrap_or_default(),
        namespace
    );
    Ok(())
}
