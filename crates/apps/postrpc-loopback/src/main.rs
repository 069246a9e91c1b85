use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use postrpc_client::{Client, ClientConfig, SystemClock};
use postrpc_proto::{ContextId, Fault, Param, Return, RpcError, TypeTag};
use postrpc_server::{Server, ServerConfig};
use postrpc_test_support::MemoryHub;
use serde_json::{json, Value as JsonValue};

const HOST: &str = "host";
const FRAME: &str = "frame";

#[derive(Parser, Debug)]
#[command(name = "postrpc-loopback", about = "Exercise a PostRPC server and client in one process")]
struct Cli {
    /// Server settings (TOML); defaults to a frame at http://frame.local.
    #[arg(long)]
    server_config: Option<PathBuf>,

    /// Client settings (TOML); defaults to a host at http://host.local.
    #[arg(long)]
    client_config: Option<PathBuf>,

    #[arg(long, default_value_t = 2)]
    a: i64,

    #[arg(long, default_value_t = 3)]
    b: i64,

    /// How long the `slow` method takes to settle.
    #[arg(long, default_value_t = 200)]
    slow_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let server_config = match &cli.server_config {
        Some(path) => ServerConfig::from_path(path)
            .with_context(|| format!("loading server config {}", path.display()))?,
        None => ServerConfig::new("http://frame.local").with_child(FRAME),
    };
    let client_config = match &cli.client_config {
        Some(path) => ClientConfig::from_path(path)
            .with_context(|| format!("loading client config {}", path.display()))?,
        None => ClientConfig::new("http://host.local", HOST),
    };

    let hub = MemoryHub::new();
    let host = client_config.parent.clone();
    let frame = server_config.child.clone().unwrap_or_else(|| ContextId::from(FRAME));
    hub.add_context(host.clone(), client_config.origin.clone(), None);
    hub.add_context(frame.clone(), server_config.origin.clone(), Some(host.clone()));

    let server = Arc::new(Server::new(server_config, hub.endpoint(host.clone())));
    register_methods(&server, cli.slow_ms);
    let client = Arc::new(Client::new(client_config, hub.endpoint(frame.clone()), Arc::new(SystemClock)));

    let to_server = Arc::clone(&server);
    hub.attach(&host, move |source, origin, payload| {
        to_server.on_message(source, origin, payload);
    });
    let to_client = Arc::clone(&client);
    hub.attach(&frame, move |source, origin, payload| {
        to_client.on_message(source, origin, payload);
    });

    let pump_hub = hub.clone();
    let pump = tokio::spawn(async move {
        loop {
            pump_hub.pump();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    server.start();
    client.start();
    client.subscribe("changed", |payload: Result<&JsonValue, &RpcError>| match payload {
        Ok(value) => println!("event changed: {value}"),
        Err(err) => println!("event changed failed: {err}"),
    });

    for descriptor in server.methods() {
        log::info!("registered {} -> {}: {}", descriptor.name, descriptor.returns, descriptor.description);
    }

    report("add", client.call("add", Some(json!({"a": cli.a, "b": cli.b})))?.await);
    report("multiply", client.call("multiply", Some(json!([cli.a, cli.b])))?.await);
    report("slow", client.call("slow", Some(json!([cli.a])))?.await);
    report("fail", client.call("fail", None)?.await);
    report("missing", client.call("missing", None)?.await);
    let impatient = cli.slow_ms / 4;
    report("slow (timeout)", client.call_with_timeout("slow", Some(json!([cli.a])), impatient)?.await);

    server.publish("changed", json!({"state": "done"}))?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.stop();
    server.stop();
    pump.abort();
    log::info!("dropped messages: {}", hub.dropped());
    Ok(())
}

fn register_methods(server: &Server, slow_ms: u64) {
    server.register(
        "add",
        [("a", TypeTag::Number), ("b", TypeTag::Number)],
        TypeTag::Number,
        |args: Vec<JsonValue>| add(&args),
        "Adds two integers",
    );
    server.register(
        "multiply",
        [("a", TypeTag::Number), ("b", TypeTag::Number)],
        TypeTag::Number,
        |args: Vec<JsonValue>| multiply(&args),
        "Multiplies two integers",
    );
    server.register(
        "slow",
        [("value", TypeTag::Any)],
        TypeTag::Any,
        move |args: Vec<JsonValue>| {
            let value = args[0].clone();
            Ok(Return::deferred(async move {
                tokio::time::sleep(Duration::from_millis(slow_ms)).await;
                Ok(Return::from(value))
            }))
        },
        "Echoes its argument after a delay",
    );
    server.register(
        "fail",
        Vec::<Param>::new(),
        TypeTag::Any,
        |_| Err(Fault::new("Failed", "this method always fails")),
        "Always raises",
    );
}

fn add(args: &[JsonValue]) -> Result<Return, Fault> {
    number(&args[0])?.checked_add(number(&args[1])?).map(Return::from).ok_or_else(overflow)
}

fn multiply(args: &[JsonValue]) -> Result<Return, Fault> {
    number(&args[0])?.checked_mul(number(&args[1])?).map(Return::from).ok_or_else(overflow)
}

fn overflow() -> Fault {
    Fault::new("RangeError", "integer overflow")
}

fn number(value: &JsonValue) -> Result<i64, Fault> {
    value.as_i64().ok_or_else(|| Fault::new("TypeError", format!("{value} is not an integer")))
}

fn report(label: &str, outcome: Result<JsonValue, RpcError>) {
    match outcome {
        Ok(value) => println!("{label}: {value}"),
        Err(err) => println!("{label}: error {} {} {}", err.code, err.message, err.data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_on_small_integers() {
        let sum = add(&[json!(2), json!(3)]).expect("sum").into_wire().expect("wire");
        let product = multiply(&[json!(-4), json!(3)]).expect("product").into_wire().expect("wire");
        assert_eq!(sum, json!(5));
        assert_eq!(product, json!(-12));
    }

    #[test]
    fn overflow_is_a_range_error() {
        let err = add(&[json!(i64::MAX), json!(1)]).expect_err("overflow");
        assert_eq!(err.to_rpc_error().message, "RangeError");

        let err = multiply(&[json!(i64::MIN), json!(-1)]).expect_err("overflow");
        assert_eq!(err.to_rpc_error().message, "RangeError");
    }

    #[test]
    fn non_integers_are_type_errors() {
        let err = add(&[json!("2"), json!(3)]).expect_err("not a number");
        assert_eq!(err.to_rpc_error().message, "TypeError");
    }
}
