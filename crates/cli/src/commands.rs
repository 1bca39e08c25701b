//! CLI subcommands.

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Subcommand;
use session::{CallError, CallHandler, CallStatus, Peer, RpcController};
use std::fmt;
use std::sync::Arc;
use tracing::info;
use transport::{connect_pair, Endpoint, TransportConfig};

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Open a session pair, trade quote calls in both directions, then shut down.
    Demo {
        /// Number of calls, alternating between the two peers.
        #[arg(long, default_value_t = 4)]
        calls: usize,
        /// Start a call the remote never answers and shut down mid-call.
        #[arg(long)]
        interrupt: bool,
        /// How many tasks race to shut the first session down.
        #[arg(long, default_value_t = 1)]
        concurrent_shutdowns: usize,
    },
}

/// Lines of output produced by a command.
#[derive(Debug, Default, Clone)]
pub struct CommandResult {
    pub lines: Vec<String>,
}

impl CommandResult {
    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Quote desk served by each demo peer.
struct QuoteDesk {
    name: String,
}

#[async_trait]
impl CallHandler for QuoteDesk {
    async fn handle(&self, method: &str, request: Bytes) -> Result<Bytes, CallError> {
        match method {
            "Market.Quote" => {
                let symbol = String::from_utf8_lossy(&request);
                Ok(Bytes::from(format!("{} quotes {}", self.name, symbol)))
            }
            "Market.Stall" => std::future::pending().await,
            other => Err(CallError::Unimplemented(other.to_string())),
        }
    }
}

fn endpoint(name: &str) -> Endpoint {
    Endpoint::new(Peer::new(name)).with_handler(QuoteDesk {
        name: name.to_string(),
    })
}

impl Command {
    pub async fn execute(&self, transport: &TransportConfig) -> anyhow::Result<CommandResult> {
        match self {
            Command::Demo {
                calls,
                interrupt,
                concurrent_shutdowns,
            } => demo(transport, *calls, *interrupt, *concurrent_shutdowns).await,
        }
    }
}

async fn demo(
    transport: &TransportConfig,
    calls: usize,
    interrupt: bool,
    concurrent_shutdowns: usize,
) -> anyhow::Result<CommandResult> {
    info!(calls, interrupt, concurrent_shutdowns, "starting session demo");
    let (alice, bob) = connect_pair(transport, endpoint("alice"), endpoint("bob"))?;
    let (alice, bob) = (Arc::new(alice), Arc::new(bob));
    let mut result = CommandResult::default();

    for i in 0..calls {
        let (caller, name) = if i % 2 == 0 {
            (&alice, "alice")
        } else {
            (&bob, "bob")
        };
        let reply = caller
            .call("Market.Quote", Bytes::from(format!("SYM{}", i)))
            .await?;
        result.push(format!(
            "{} -> {}: {}",
            name,
            caller.peer().name,
            String::from_utf8_lossy(&reply)
        ));
    }

    if interrupt {
        let controller = alice.controller()?;
        let stalled = {
            let alice = Arc::clone(&alice);
            tokio::spawn(async move { alice.call("Market.Stall", Bytes::new()).await })
        };
        while controller.status() != CallStatus::InFlight {
            tokio::task::yield_now().await;
        }
        alice.shutdown();
        let outcome = match stalled.await? {
            Ok(_) => "completed".to_string(),
            Err(err) => err.to_string(),
        };
        result.push(format!("in-flight call after shutdown: {}", outcome));
    }

    let racers: Vec<_> = (0..concurrent_shutdowns.max(1))
        .map(|_| {
            let alice = Arc::clone(&alice);
            tokio::spawn(async move {
                alice.shutdown();
                alice.state()
            })
        })
        .collect();
    let racer_count = racers.len();
    for racer in racers {
        let state = racer.await?;
        if !alice.is_shut_down() {
            bail!("shutdown returned in state {}", state);
        }
    }
    result.push(format!(
        "alice session: {} after {} shutdown call(s)",
        alice.state(),
        racer_count
    ));

    bob.shutdown();
    result.push(format!("bob session: {}", bob.state()));

    match alice.channel() {
        Ok(_) => bail!("channel still available after shutdown"),
        Err(err) => result.push(format!("post-shutdown access: {}", err)),
    }
    Ok(result)
}
