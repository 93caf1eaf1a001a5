// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Quilt demo daemon.
//!
//! Boots an in-process mesh, publishes a `Post` service on its own mesh node,
//! starts a gateway that composes a local `User` node with the remote `Post`,
//! and serves the result at `POST /graphql`.

use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use quilt_app_core::config::Settings;
use quilt_app_core::settings::{GatewaySettings, GATEWAY_SETTINGS_KEY};
use quilt_broker::Mesh;
use quilt_config_fs::SettingsDir;
use quilt_gateway::{publish_node, Gateway, GatewayError, GatewayHandle};
use quilt_proto::QueryPayload;
use quilt_resolve::{Call, Handler, ResolveSpec};
use quilt_schema::{EnumFragment, Node};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quilt demo gateway daemon")]
struct Args {
    /// HTTP listener for GraphQL clients
    #[arg(long, default_value = "127.0.0.1:8790")]
    listen: SocketAddr,
    /// Gateway name
    #[arg(long, default_value = "front")]
    name: String,
    /// Scope shared by the gateway and its services (overrides the config file)
    #[arg(long)]
    scope: Option<String>,
    /// Discovery poll interval in milliseconds (overrides the config file)
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Directory holding `gateway.json` instead of the platform config dir
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

/// Persisted settings, or defaults when the store is unusable.
fn load_settings(args: &Args) -> GatewaySettings {
    let store = match &args.config_dir {
        Some(dir) => SettingsDir::at(dir),
        None => SettingsDir::platform(),
    };
    let loaded = store.and_then(|store| Settings::new(store).get_or_seed::<GatewaySettings>(GATEWAY_SETTINGS_KEY));
    let mut settings = loaded.unwrap_or_else(|err| {
        warn!(error = %err, "gateway settings unavailable, using defaults");
        GatewaySettings::default()
    });
    if let Some(scope) = &args.scope {
        settings.scope.clone_from(scope);
    }
    if let Some(poll) = args.poll_interval_ms {
        settings.poll_interval_ms = poll;
    }
    settings
}

fn user_node() -> Result<Node> {
    let roles = BTreeMap::from([("ADMIN".to_owned(), json!(1)), ("MEMBER".to_owned(), json!(2))]);
    Ok(Node::builder("User")
        .type_text(
            "type User { id: ID! name: String role: Role }\n\
             extend type Query { user(id: ID!): User }",
        )
        .query(
            "user",
            ResolveSpec::new(|call: Call| async move {
                let id = call.arg("id").and_then(Value::as_str).unwrap_or_default().to_owned();
                let role = if id == "1" { 1 } else { 2 };
                Ok(json!({ "id": id, "role": role, "requests": call.context.get("requests") }))
            })
            .pre(|call: Call| async move {
                call.context.update("requests", |v| *v = json!(v.as_i64().unwrap_or(0) + 1));
                Ok(())
            }),
        )
        .field(
            "name",
            Handler::plain(|call: Call| async move {
                Ok(json!(format!("user-{}", call.parent["id"].as_str().unwrap_or("?"))))
            }),
        )
        .appliance(EnumFragment::new("Role", "enum Role { ADMIN MEMBER }")?.values(roles))
        .build()?)
}

fn post_node() -> Result<Node> {
    Ok(Node::builder("Post")
        .type_text(
            "type Post { id: ID! title: String authorId: ID }\n\
             extend type Query { post(id: ID!): Post posts: [Post] }",
        )
        .query(
            "post",
            Handler::plain(|call: Call| async move {
                let id = call.arg("id").cloned().unwrap_or(Value::Null);
                Ok(json!({ "id": id, "title": "Hello from the Post service", "authorId": "1" }))
            }),
        )
        .query(
            "posts",
            Handler::value(json!([
                { "id": "1", "title": "first", "authorId": "1" },
                { "id": "2", "title": "second", "authorId": "2" }
            ])),
        )
        .build()?)
}

/// JSON body of `POST /graphql`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphqlRequest {
    query: String,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
    #[serde(default)]
    operation_name: Option<String>,
}

async fn graphql(State(gateway): State<GatewayHandle>, Json(request): Json<GraphqlRequest>) -> Response {
    let payload = QueryPayload {
        query: request.query,
        variables: request.variables.unwrap_or_default(),
        operation_name: request.operation_name,
        context: Map::new(),
    };
    match gateway.execute(payload).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => {
            let status = match &err {
                GatewayError::Federation(_) => StatusCode::BAD_REQUEST,
                GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            warn!(error = %err, "request failed");
            (status, Json(json!({ "errors": [{ "message": err.to_string() }] }))).into_response()
        }
    }
}

async fn schema(State(gateway): State<GatewayHandle>) -> Response {
    match gateway.sdl() {
        Ok(sdl) => sdl.into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let settings = load_settings(&args);
    info!(scope = %settings.scope, name = %args.name, "starting quiltd");

    let mesh = Mesh::with_heartbeat(settings.heartbeat_interval());
    let published = publish_node(&mesh.node("posts"), &settings.scope, &post_node()?)
        .await
        .context("publish Post service")?;
    info!(instance = %published.instance, "demo service online");

    let (stop, stopped) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler unavailable");
            return;
        }
        info!("shutting down");
        stop.send_replace(true);
    });
    let gateway = Gateway::builder(args.name.as_str())
        .settings(settings)
        .node(user_node()?)
        .remote("Post")
        .shutdown_signal(stopped.clone())
        .start(Arc::new(mesh.node("gateway")))
        .await
        .context("start gateway")?;

    let app = Router::new()
        .route("/graphql", post(graphql))
        .route("/schema", get(schema))
        .with_state(gateway.clone());

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    info!("graphql listening on http://{}/graphql", listener.local_addr()?);

    let mut on_stop = stopped;
    let watched = gateway.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // A peer abort ends the run as well.
            tokio::select! {
                _ = on_stop.wait_for(|stop| *stop) => {}
                _ = watched.wait() => {}
            }
        })
        .await?;

    gateway.stop().await;
    gateway.wait().await?;
    Ok(())
}
