use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the property records ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show chain height and tip hash
    Head,
    /// Run a full-chain integrity check
    Validate,
    /// Fetch a block by hash
    Block { hash: String },
    /// Verify a block and the chain it belongs to
    Verify { hash: String },
    /// List blocks referencing an entity
    History { entity: String },
    /// Query the audit trail
    Audit {
        /// Record type, e.g. PAYMENT
        #[arg(long = "type")]
        record_type: Option<String>,
        /// Inclusive lower bound, unix ms
        #[arg(long)]
        start: Option<u64>,
        /// Inclusive upper bound, unix ms
        #[arg(long)]
        end: Option<u64>,
    },
    /// Record a payment
    Pay {
        #[arg(long)]
        payment_id: String,
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        property_id: String,
        #[arg(long)]
        lease_id: Option<String>,
        /// Amount in minor units
        #[arg(long)]
        amount: u64,
        #[arg(long, default_value = "ach")]
        method: String,
    },
    /// Fingerprint a file and record it on the chain
    Document {
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        document_type: String,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long)]
        file: PathBuf,
    },
    /// Produce a signed proof for a file without recording it
    Proof {
        #[arg(long)]
        file: PathBuf,
    },
    /// Check a file against a previously issued proof
    Check {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        hash: String,
        #[arg(long)]
        signature: String,
    },
}

#[derive(Serialize)]
struct AuditQuery {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    record_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<u64>,
}

/// Join path segments onto the node URL, percent-encoding each one.
fn endpoint(node: &str, segments: &[&str]) -> String {
    let mut url = node.to_string();
    for segment in segments {
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    url
}

fn read_hex(file: &Path) -> Result<String> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    Ok(hex::encode(bytes))
}

async fn print_response(res: reqwest::Response) -> Result<()> {
    let status = res.status();
    let body = res.text().await?;
    println!("status: {}", status);
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{body}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();
    debug!(%node, command = ?cli.cmd, "sending request");

    let res = match cli.cmd {
        Command::Head => client.get(format!("{node}/chain/head")).send().await?,
        Command::Validate => client.get(format!("{node}/chain/valid")).send().await?,
        Command::Block { hash } => client.get(endpoint(&node, &["blocks", &hash])).send().await?,
        Command::Verify { hash } => {
            client
                .get(endpoint(&node, &["blocks", &hash, "verify"]))
                .send()
                .await?
        }
        Command::History { entity } => {
            client
                .get(endpoint(&node, &["entities", &entity, "history"]))
                .send()
                .await?
        }
        Command::Audit {
            record_type,
            start,
            end,
        } => {
            let query = AuditQuery {
                record_type,
                start,
                end,
            };
            client
                .get(format!("{node}/audit"))
                .query(&query)
                .send()
                .await?
        }
        Command::Pay {
            payment_id,
            tenant_id,
            property_id,
            lease_id,
            amount,
            method,
        } => {
            let body = json!({
                "payment_id": payment_id,
                "tenant_id": tenant_id,
                "property_id": property_id,
                "lease_id": lease_id,
                "amount": amount,
                "method": method,
            });
            client
                .post(format!("{node}/records/payment"))
                .json(&body)
                .send()
                .await?
        }
        Command::Document {
            document_id,
            document_type,
            entity_id,
            file,
        } => {
            // Register the fingerprint first so the recorded hash is the proof hash.
            let proof: serde_json::Value = client
                .post(format!("{node}/proofs"))
                .json(&json!({ "content_hex": read_hex(&file)? }))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let content_hash = proof["hash"]
                .as_str()
                .context("node returned a proof without a hash")?;
            println!("proof: {}", serde_json::to_string_pretty(&proof)?);
            let body = json!({
                "document_id": document_id,
                "document_type": document_type,
                "content_hash": content_hash,
                "entity_id": entity_id,
            });
            client
                .post(format!("{node}/records/document"))
                .json(&body)
                .send()
                .await?
        }
        Command::Proof { file } => {
            client
                .post(format!("{node}/proofs"))
                .json(&json!({ "content_hex": read_hex(&file)? }))
                .send()
                .await?
        }
        Command::Check {
            file,
            hash,
            signature,
        } => {
            let body = json!({
                "content_hex": read_hex(&file)?,
                "hash": hash,
                "signature": signature,
            });
            client
                .post(format!("{node}/proofs/verify"))
                .json(&body)
                .send()
                .await?
        }
    };
    print_response(res).await
}
