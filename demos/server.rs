//! Demo server mounting one gatekey instance over a static user list.
//!
//! ```sh
//! cargo run --example server -- serve --config demos/gatekey.yaml
//! curl -X POST localhost:8080/auth -d '{"username":"alice","password":"wonderland"}'
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use axum::Router;
use axum::routing::get;
use clap::{Parser, Subcommand};
use gatekey::{
    Auth, Authenticate, ClaimSet, Configuration, Error, MemoryStore, RequestContext, Result,
    RetrieveUser, ScopeProvider, Subject,
};
use rand::rngs::OsRng;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server.
    Serve {
        /// YAML file with `listen`, `auth` and `users`.
        #[arg(long, default_value = "demos/gatekey.yaml")]
        config: PathBuf,
    },
    /// Print an Argon2id hash to paste into the user list.
    HashPassword { password: String },
}

#[derive(Debug, Deserialize)]
struct DemoConfig {
    listen: SocketAddr,
    #[serde(default)]
    auth: Map<String, Value>,
    #[serde(default)]
    users: Vec<DemoUser>,
}

#[derive(Debug, Clone, Deserialize)]
struct DemoUser {
    user_id: String,
    name: Option<String>,
    password: String,
    #[serde(default)]
    scopes: Vec<String>,
}

impl DemoUser {
    /// The user record as handed to gatekey, keyed by the profile's `user_id` claim.
    fn record(&self, user_id_key: &str) -> Value {
        let mut record = Map::new();
        record.insert(user_id_key.to_owned(), Value::from(self.user_id.as_str()));
        record.insert("name".into(), json!(self.name));
        Value::Object(record)
    }
}

struct DemoUsers {
    users: HashMap<String, DemoUser>,
    user_id_key: String,
}

#[async_trait]
impl Authenticate for DemoUsers {
    async fn authenticate(&self, request: &RequestContext) -> Result<Box<dyn Subject>> {
        let (Some(username), Some(password)) =
            (request.body_field("username"), request.body_field("password"))
        else {
            return Err(Error::AuthenticationFailed("missing credentials".into()));
        };
        let Some(user) = self.users.get(username) else {
            return Err(Error::AuthenticationFailed("unknown user".into()));
        };

        let hash = user.password.clone();
        let password = password.to_owned();
        let verified = tokio::task::spawn_blocking(move || {
            PasswordHash::new(&hash)
                .and_then(|hash| Argon2::default().verify_password(password.as_bytes(), &hash))
                .is_ok()
        })
        .await
        .map_err(Error::internal)?;

        if !verified {
            return Err(Error::AuthenticationFailed("wrong password".into()));
        }
        Ok(Box::new(user.record(&self.user_id_key)))
    }
}

#[async_trait]
impl RetrieveUser for DemoUsers {
    async fn retrieve_user(
        &self,
        _request: &RequestContext,
        claims: &ClaimSet,
    ) -> Result<Option<Box<dyn Subject>>> {
        Ok(self
            .users
            .get(&claims.subject)
            .map(|user| Box::new(user.record(&self.user_id_key)) as Box<dyn Subject>))
    }
}

#[async_trait]
impl ScopeProvider for DemoUsers {
    async fn scopes(&self, subject: &dyn Subject) -> Result<Vec<String>> {
        Ok(subject
            .identifier(&self.user_id_key)
            .and_then(|id| self.users.get(&id))
            .map(|user| user.scopes.clone())
            .unwrap_or_default())
    }
}

fn hash_password(password: &str) -> std::result::Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| err.to_string())
}

async fn serve(path: PathBuf) -> std::result::Result<(), BoxError> {
    let demo: DemoConfig = serde_yaml::from_reader(File::open(&path)?)?;
    let config = Configuration::from_overrides(demo.auth)?;

    let users = Arc::new(DemoUsers {
        user_id_key: config.user_id().to_owned(),
        users: demo
            .users
            .into_iter()
            .map(|user| (user.user_id.clone(), user))
            .collect(),
    });

    let auth = Auth::builder(config)
        .authenticate(users.clone())
        .retrieve_user(users.clone())
        .scope_provider(users)
        .refresh_store(Arc::new(MemoryStore::new()))
        .build()?;

    let metrics = gatekey::telemetry::setup_metrics_recorder()?;
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(metrics.render())))
        .merge(gatekey::app(&auth));

    let listener = TcpListener::bind(demo.listen).await?;
    tracing::info!(address = %demo.listen, prefix = auth.config().url_prefix(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(%err, "cannot listen for shutdown signal");
            }
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), BoxError> {
    gatekey::telemetry::setup_tracing("server=info,gatekey=info,tower_http=info")?;

    match Cli::parse().command {
        Command::Serve { config } => serve(config).await,
        Command::HashPassword { password } => {
            println!("{}", hash_password(&password)?);
            Ok(())
        },
    }
}
