//! Render Store command line
//!
//! Runs single store operations against the configured directories and
//! containers, mainly for operating and debugging a deployment.

use clap::{Parser, Subcommand};
use render_store::{ArtifactStore, HeaderMap, HeaderValue, StoreConfig, TEMPLATE_MIMETYPE_HEADER};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "render-store")]
#[command(about = "Two-tier artifact store for templates and renders")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a template file under an id
    WriteTemplate {
        id: String,
        file: PathBuf,
        /// Content type stored with the blob
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Resolve a template to a local file, fetching it if needed
    ReadTemplate { id: String },
    /// Delete a template from the templates container
    DeleteTemplate { id: String },
    /// Resolve a render to a local file and purge the remote copy
    ReadRender { id: String },
    /// Upload a finished render
    AfterRender {
        file: PathBuf,
        /// Blob name, defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the resolved configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "render_store=info,render_store_cli=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StoreConfig::load();
    debug!("configuration: {:?}", config.redacted());

    if let Command::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        return Ok(());
    }

    let store = ArtifactStore::from_config(&config)?;
    info!("render-store {}", render_store::version());

    match cli.command {
        Command::WriteTemplate {
            id,
            file,
            content_type,
        } => {
            let mut headers = HeaderMap::new();
            if let Some(content_type) = content_type {
                headers.insert(TEMPLATE_MIMETYPE_HEADER, HeaderValue::from_str(&content_type)?);
            }
            let id = store.write_template(&headers, &id, &file).await?;
            println!("{}", id);
        }
        Command::ReadTemplate { id } => {
            let path = store.read_template(&id).await?;
            println!("{}", path.display());
        }
        Command::DeleteTemplate { id } => {
            let path = store.delete_template(&id).await?;
            println!("{}", path.display());
        }
        Command::ReadRender { id } => {
            let path = store.read_render(&id).await?;
            println!("{}", path.display());
        }
        Command::AfterRender { file, name } => {
            store
                .after_render(Ok::<(), std::io::Error>(()), &file, name.as_deref())
                .await?;
        }
        Command::Config => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_write_template() {
        let cli = Cli::try_parse_from([
            "render-store",
            "write-template",
            "invoice.odt",
            "/tmp/upload",
            "--content-type",
            "application/vnd.oasis.opendocument.text",
        ])
        .unwrap();

        match cli.command {
            Command::WriteTemplate {
                id,
                file,
                content_type,
            } => {
                assert_eq!(id, "invoice.odt");
                assert_eq!(file, PathBuf::from("/tmp/upload"));
                assert_eq!(
                    content_type.as_deref(),
                    Some("application/vnd.oasis.opendocument.text")
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_after_render_without_name() {
        let cli = Cli::try_parse_from(["render-store", "after-render", "report.pdf"]).unwrap();
        assert!(matches!(cli.command, Command::AfterRender { name: None, .. }));
    }
}
