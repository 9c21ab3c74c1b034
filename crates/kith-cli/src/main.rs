//! Kith explorer binary
//!
//! Replays a JSON fixture through a real session and prints the
//! resulting graph, navigation stack and status flags.
//!
//! ```text
//! kith-explore <fixture.json> <identity> [select...]
//! ```

use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;

use kith_graph::{Graph, IdentityKey};
use kith_session::{Fixture, MemorySource, Session, SessionConfig, Sources, StatusSnapshot};
use serde::Serialize;

#[derive(Serialize)]
struct Output {
    graph: Graph,
    stack: Vec<IdentityKey>,
    transitions: Vec<&'static str>,
    status: StatusSnapshot,
}

fn load_fixture(path: &Path) -> Result<Fixture, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    kith_logging::init(kith_logging::DEFAULT_FILTER);

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <fixture.json> <identity> [select...]", args[0]);
        process::exit(2);
    }

    let fixture = load_fixture(Path::new(&args[1]))?;
    let identity = IdentityKey::parse(&args[2])?;
    let source = Arc::new(MemorySource::from_fixture(fixture));
    let session = Session::new(SessionConfig::from_env(), Sources::from_single(source))?;

    session.login(identity).await?;
    session.wait_idle().await;

    let mut transitions = Vec::new();
    for raw in &args[3..] {
        let id = IdentityKey::parse(raw)?;
        let transition = session.select_key(&id).await?;
        tracing::info!(identity = %id, transition = transition.name(), "Selected");
        transitions.push(transition.name());
        session.wait_idle().await;
    }

    let output = Output {
        graph: session.graph().await,
        stack: session.stack().await.into_iter().map(|n| n.id).collect(),
        transitions,
        status: session.status().await,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    session.logout().await;
    Ok(())
}
