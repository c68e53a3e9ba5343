//! CLI surface for the tether binary.
//!
//! Thin handlers over the library: run a diagnostic executor, forward a
//! call, health-check an endpoint.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::Config;
use crate::core::{CodecError, TaggedValue};
use crate::remote::{
    ExecutorServer, Forwarder, HandlerError, HandlerRegistry, Signature, proto,
};
use crate::{Result, Tag};

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Cross-process call forwarding and event correlation harness",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Endpoint socket path (default: $XDG_RUNTIME_DIR/tether/executor.sock).
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run an executor endpoint with the built-in diagnostic registry.
    Serve,

    /// Forward a call and print the JSON result.
    Call {
        method: String,

        /// JSON array of arguments, e.g. '[true, "text"]'.
        #[arg(default_value = "[]")]
        args: String,
    },

    /// Health-check an endpoint.
    Ping,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli, config: &Config) -> Result<()> {
    let socket = match cli.socket {
        Some(path) => path,
        None => {
            proto::ensure_socket_dir()?;
            proto::socket_path()
        }
    };

    match cli.command {
        CliCommand::Serve => {
            let server = ExecutorServer::bind(&socket, diagnostic_registry())?;
            println!("listening on {}", server.socket().display());
            server.join();
            Ok(())
        }
        CliCommand::Call { method, args } => {
            let values: Vec<serde_json::Value> = serde_json::from_str(&args).map_err(|e| {
                CodecError::Unsupported {
                    reason: format!("arguments must be a JSON array: {e}"),
                }
            })?;
            let forwarder = Forwarder::new(&socket, &config.call);
            let result = forwarder.forward_values(&method, &values)?;
            println!("{}", serde_json::to_string_pretty(&result.to_json()).expect("render result"));
            Ok(())
        }
        CliCommand::Ping => {
            let forwarder = Forwarder::new(&socket, &config.call);
            forwarder.ping()?;
            println!("pong");
            Ok(())
        }
    }
}

/// Built-in registry for `serve`: enough surface to exercise an endpoint by
/// hand.
fn diagnostic_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry
        .register("ping", Signature::empty(), |_| {
            Ok(TaggedValue::Str("pong".to_string()))
        })
        .expect("register ping");

    registry
        .register("echo", [Tag::Str], |args| {
            Ok(TaggedValue::Str(args[0].expect_str()?.to_string()))
        })
        .expect("register echo");

    registry
        .register("reverse", [Tag::Str], |args| {
            Ok(TaggedValue::Str(
                args[0].expect_str()?.chars().rev().collect(),
            ))
        })
        .expect("register reverse");

    registry
        .register("fail", Signature::empty(), |_| {
            Err(HandlerError::failed("probe_failure", "diagnostic failure probe"))
        })
        .expect("register fail");

    registry
}
