//! Config subcommand handlers.

use mandelbox_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let (cfg, _) = super::load(global)?;
            let shown = cfg.redacted();
            let rendered = match global.output {
                OutputFormat::Table => toml::to_string_pretty(&shown)
                    .map_err(|e| CliError::Render(e.to_string()))?,
                OutputFormat::Json => serde_json::to_string_pretty(&shown)
                    .map_err(|e| CliError::Render(e.to_string()))?,
            };
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", super::config_file(global).display());
            Ok(())
        }

        ConfigCommand::Init {
            force,
            webserver_url,
            protocol_path,
        } => {
            let path = super::config_file(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let mut cfg = Config::default();
            if let Some(url) = webserver_url {
                cfg.webserver.url = url;
            }
            if let Some(protocol) = protocol_path {
                cfg.protocol.path = protocol;
            }
            // Refuse to write something the launcher could not use.
            config::to_launcher_config(&cfg)?;

            config::save_config_to(&path, &cfg)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}
