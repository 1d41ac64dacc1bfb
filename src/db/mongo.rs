use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use mongodb::bson::{doc, Bson};
use mongodb::options::ClientOptions;
use mongodb::Client;
use tokio::runtime::Handle;

use super::AdminClient;
use crate::sample::Op;

/// How long the driver may spend finding a server before `connect` gives up.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// `AdminClient` over the async MongoDB driver.
///
/// The sampler runs on a plain OS thread, so every command is driven to
/// completion through the runtime handle captured at connect time.
pub struct MongoAdmin {
    client: Client,
    runtime: Handle,
}

impl MongoAdmin {
    /// Connects and pings the server so that bad hosts or credentials fail
    /// here, before any sampling starts.
    ///
    /// Accepts either a full `mongodb://` URI or a bare `host:port`.
    pub async fn connect(target: &str, runtime: Handle) -> Result<Self> {
        let uri = normalize_uri(target);

        let mut options = ClientOptions::parse(&uri)
            .await
            .with_context(|| format!("invalid MongoDB address \"{target}\""))?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);

        let client = Client::with_options(options).context("building MongoDB client")?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .with_context(|| format!("cannot reach MongoDB at {uri}"))?;

        tracing::info!(uri = %uri, "connected to MongoDB");
        Ok(Self { client, runtime })
    }

    fn admin_command(&self, command: mongodb::bson::Document) -> Result<mongodb::bson::Document> {
        let db = self.client.database("admin");
        self.runtime
            .block_on(db.run_command(command, None))
            .map_err(anyhow::Error::from)
    }
}

impl AdminClient for MongoAdmin {
    fn whoami(&self) -> Result<String> {
        let reply = self
            .admin_command(doc! { "whatsmyuri": 1 })
            .context("running whatsmyuri")?;
        reply
            .get_str("you")
            .map(str::to_string)
            .context("whatsmyuri reply has no `you` field")
    }

    fn current_ops(&self) -> Result<Vec<Op>> {
        let reply = self
            .admin_command(doc! { "currentOp": 1 })
            .context("running currentOp")?;
        let inprog = reply
            .get_array("inprog")
            .context("currentOp reply has no `inprog` array")?;

        inprog
            .iter()
            .map(|entry| match entry {
                Bson::Document(op) => Ok(op.clone()),
                other => Err(anyhow!(
                    "currentOp returned a non-document entry: {:?}",
                    other.element_type()
                )),
            })
            .collect()
    }
}

fn normalize_uri(target: &str) -> String {
    if target.starts_with("mongodb://") || target.starts_with("mongodb+srv://") {
        target.to_string()
    } else {
        format!("mongodb://{target}")
    }
}
