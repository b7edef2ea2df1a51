//! Command implementations.
//!
//! Each command returns the JSON document the binary prints on stdout.

use ocideploy_oci::{
    ContainerReference, DistributionTransport, LayerSet, Platform, PullOptions, TokenExchange,
    build_archive, collect_files, pull_image, push_image, resolve_credentials,
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::cli::{CliError, Cli, Commands};
use crate::config::Settings;

/// Run the command selected on the command line.
pub async fn execute(cli: &Cli) -> Result<Value, CliError> {
    match &cli.command {
        Commands::Archive {
            sources,
            output,
            archive_root,
            working_directory,
        } => archive(
            sources,
            output,
            archive_root.as_deref(),
            working_directory.as_deref(),
        ),
        Commands::Pull {
            name,
            tag,
            path,
            strict_platform,
            platform,
        } => {
            let settings = Settings::resolve(
                cli.config.as_deref(),
                cli.credentials.as_deref(),
                cli.insecure,
                *strict_platform,
            )?;
            pull(&settings, name, tag, path.as_deref(), platform.as_deref()).await
        }
        Commands::Push {
            name,
            tag,
            layers,
            platform_layers,
        } => {
            let settings = Settings::resolve(
                cli.config.as_deref(),
                cli.credentials.as_deref(),
                cli.insecure,
                false,
            )?;
            let layer_set = parse_layer_set(layers, platform_layers.as_deref())?;
            push(&settings, name, tag, &layer_set).await
        }
    }
}

/// Build a reproducible layer archive from `sources`.
#[instrument(skip_all, fields(output = %output.display()))]
pub fn archive(
    sources: &[PathBuf],
    output: &Path,
    archive_root: Option<&str>,
    working_directory: Option<&Path>,
) -> Result<Value, CliError> {
    let working_directory = match working_directory {
        Some(dir) => dir.to_path_buf(),
        None => current_dir()?,
    };

    let files = collect_files(sources, &working_directory)?;
    let output_path = build_archive(&files, output, &working_directory, archive_root)?;
    info!(file_count = files.len(), "Built layer archive");

    Ok(json!({ "output_path": output_path }))
}

/// Pull `name:tag` into `path` (default: current directory).
pub async fn pull(
    settings: &Settings,
    name: &str,
    tag: &str,
    path: Option<&Path>,
    platform: Option<&str>,
) -> Result<Value, CliError> {
    let destination = match path {
        Some(path) => path.to_path_buf(),
        None => current_dir()?,
    };
    let options = PullOptions {
        platform: platform.map(Platform::parse).transpose()?,
        strict_platform: settings.strict_platform,
    };

    let transport = connect(settings, name).await?;
    let outcome = pull_image(&transport, &format!("{name}:{tag}"), &destination, &options).await?;
    info!(
        "Pulled {name}:{tag} ({} file(s)) to {}",
        outcome.files.len(),
        outcome.path.display()
    );

    to_json(&outcome)
}

/// Push `layers` as `name:tag`.
pub async fn push(
    settings: &Settings,
    name: &str,
    tag: &str,
    layers: &LayerSet,
) -> Result<Value, CliError> {
    let transport = connect(settings, name).await?;
    let outcome = push_image(&transport, name, tag, layers).await?;
    to_json(&outcome)
}

/// Build the layer set from `--layer` paths or `--platform-layers`.
///
/// `platform_layers` is inline JSON when it starts with `[`, otherwise the
/// path of a JSON file.
pub fn parse_layer_set(
    layers: &[PathBuf],
    platform_layers: Option<&str>,
) -> Result<LayerSet, CliError> {
    let Some(platform_layers) = platform_layers else {
        return Ok(LayerSet::Flat(layers.to_vec()));
    };

    let contents = if platform_layers.trim_start().starts_with('[') {
        platform_layers.to_string()
    } else {
        std::fs::read_to_string(platform_layers).map_err(|e| {
            CliError::config(format!("Failed to read platform layers {platform_layers}: {e}"))
        })?
    };
    let value: Value = serde_json::from_str(&contents)
        .map_err(|e| CliError::config(format!("Platform layers are not valid JSON: {e}")))?;

    Ok(LayerSet::from_json(&value)?)
}

/// Create a transport authenticated with the configured credentials.
///
/// Without credentials the transport falls back to docker's stored logins.
pub async fn connect(settings: &Settings, name: &str) -> Result<DistributionTransport, CliError> {
    let transport = DistributionTransport::insecure(settings.insecure);
    if settings.credentials.is_none() {
        debug!("No credentials configured");
        return Ok(transport);
    }

    let registry = match &settings.registry {
        Some(registry) => registry.clone(),
        None => ContainerReference::parse(name)?.registry,
    };
    let exchange = token_exchange();
    let resolved = resolve_credentials(&settings.credentials, &registry, exchange.as_ref()).await?;
    Ok(transport.with_credentials(&resolved))
}

#[cfg(feature = "aws")]
fn token_exchange() -> Box<dyn TokenExchange> {
    Box::new(ocideploy_aws::EcrTokenExchange::new())
}

#[cfg(not(feature = "aws"))]
fn token_exchange() -> Box<dyn TokenExchange> {
    Box::new(ocideploy_oci::UnavailableTokenExchange)
}

fn current_dir() -> Result<PathBuf, CliError> {
    std::env::current_dir()
        .map_err(|e| CliError::config(format!("Cannot determine current directory: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, CliError> {
    serde_json::to_value(value)
        .map_err(|e| CliError::operation(format!("Failed to serialize result: {e}")))
}
