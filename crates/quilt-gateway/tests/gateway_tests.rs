// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]

mod common;

use common::{post, settings, user, PATIENCE};
use futures::StreamExt;
use quilt_broker::{Broker, Mesh};
use quilt_gateway::{publish_node, Gateway, GatewayError, RunOutcome};
use quilt_proto::{QueryPayload, ServiceName};
use quilt_resolve::{Call, ResolveSpec};
use quilt_schema::Node;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

#[tokio::test]
async fn local_and_remote_nodes_compose_into_one_gateway() {
    let mesh = Mesh::new();
    publish_node(&mesh.node("posts"), "main", &post()).await.unwrap();

    let gateway = timeout(
        PATIENCE,
        Gateway::builder("front")
            .settings(settings("main"))
            .node(user())
            .remote("Post")
            .start(Arc::new(mesh.node("gw"))),
    )
    .await
    .unwrap()
    .unwrap();

    let out = gateway
        .execute(QueryPayload::new("{ user(id: \"1\") { id name } post { title author } }"))
        .await
        .unwrap();
    assert!(out.errors.is_empty(), "{:?}", out.errors);
    assert_eq!(
        out.data,
        json!({
            "user": { "id": "1", "name": "user-1" },
            "post": { "title": "HELLO", "author": "ada" },
        })
    );

    let state = gateway.state();
    assert!(state.is_ready());
    assert!(state.declared_local.contains("User"));
    assert!(state.registered.contains_key("Post"));
    let sdl = state.composed_schema.unwrap();
    assert!(sdl.contains("type User {"));
    assert!(sdl.contains("type Post {"));
    assert_eq!(gateway.instance().to_string(), "front:main:gw");
    gateway.stop().await;
}

#[tokio::test]
async fn remote_subscriptions_stream_through_the_gateway() {
    let mesh = Mesh::new();
    publish_node(&mesh.node("posts"), "main", &post()).await.unwrap();
    let gateway = Gateway::builder("front")
        .settings(settings("main"))
        .remote("Post")
        .start(Arc::new(mesh.node("gw")))
        .await
        .unwrap();

    let stream = gateway
        .subscribe(QueryPayload::new("subscription { posted { title } }"))
        .await
        .unwrap();
    let titles: Vec<Value> = timeout(PATIENCE, stream.collect::<Vec<_>>())
        .await
        .unwrap()
        .into_iter()
        .map(|response| response.unwrap().data["posted"]["title"].clone())
        .collect();
    assert_eq!(titles, vec![json!("ONE"), json!("TWO")]);
    gateway.stop().await;
}

#[tokio::test]
async fn discovery_waits_for_late_services() {
    let mesh = Mesh::new();
    let start = tokio::spawn(
        Gateway::builder("front")
            .settings(settings("main"))
            .node(user())
            .remote("Post")
            .start(Arc::new(mesh.node("gw"))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!start.is_finished());

    publish_node(&mesh.node("posts"), "main", &post()).await.unwrap();
    let gateway = timeout(PATIENCE, start).await.unwrap().unwrap().unwrap();
    assert!(gateway.state().all_registered());
    gateway.stop().await;
}

#[tokio::test]
async fn shutdown_signal_cancels_discovery() {
    let mesh = Mesh::new();
    let broker = Arc::new(mesh.node("gw"));
    let (tx, rx) = watch::channel(false);
    let start = tokio::spawn(
        Gateway::builder("front")
            .settings(settings("main"))
            .remote("Missing")
            .shutdown_signal(rx)
            .start(broker.clone()),
    );
    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.send(true).unwrap();

    let err = timeout(PATIENCE, start).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::Stopped), "{err}");
    let live = broker.list_live_nodes(&ServiceName::new("front", "main")).await.unwrap();
    assert!(live.is_empty());
}

#[tokio::test]
async fn bad_configuration_is_rejected_before_registering() {
    let mesh = Mesh::new();
    let broker = Arc::new(mesh.node("gw"));
    let err = Gateway::builder("front.v2")
        .node(user())
        .start(broker.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)));

    let err = Gateway::builder("front").start(broker.clone()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)));

    let err = Gateway::builder("front")
        .node(user())
        .remote("User")
        .start(broker)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)));
}

#[tokio::test]
async fn pre_hook_counter_is_seen_by_resolver_and_post_hooks_across_the_wire() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let first = seen.clone();
    let second = seen.clone();
    let counter = Node::builder("Counter")
        .type_text("type Counter { value: Int }\nextend type Query { counter: Counter }")
        .query(
            "counter",
            ResolveSpec::new(|call: Call| async move {
                Ok(json!({ "value": call.context.get("counter") }))
            })
            .pre(|call: Call| async move {
                call.context.update("counter", |v| *v = json!(v.as_i64().unwrap_or(0) + 1));
                Ok(())
            })
            .post(move |_value: Value, call: Call| {
                let seen = first.clone();
                async move {
                    seen.lock().unwrap().push(call.context.get("counter"));
                    Ok(())
                }
            })
            .post(move |_value: Value, call: Call| {
                let seen = second.clone();
                async move {
                    seen.lock().unwrap().push(call.context.get("counter"));
                    Ok(())
                }
            }),
        )
        .build()
        .unwrap();

    let mesh = Mesh::new();
    publish_node(&mesh.node("counters"), "main", &counter).await.unwrap();
    let gateway = Gateway::builder("front")
        .settings(settings("main"))
        .remote("Counter")
        .start(Arc::new(mesh.node("gw")))
        .await
        .unwrap();

    let mut payload = QueryPayload::new("{ counter { value } }");
    payload.context.insert("counter".into(), json!(41));
    let out = gateway.execute(payload).await.unwrap();
    assert_eq!(out.data, json!({ "counter": { "value": 42 } }));
    assert_eq!(*seen.lock().unwrap(), vec![Some(json!(42)), Some(json!(42))]);
    gateway.stop().await;
}

#[tokio::test]
async fn unreachable_services_surface_as_field_errors() {
    let mesh = Mesh::new();
    publish_node(&mesh.node("posts"), "main", &post()).await.unwrap();
    let gateway = Gateway::builder("front")
        .settings(settings("main"))
        .node(user())
        .remote("Post")
        .start(Arc::new(mesh.node("gw")))
        .await
        .unwrap();

    mesh.disconnect("posts").await;
    let out = gateway
        .execute(QueryPayload::new("{ user(id: \"2\") { id } post { title } }"))
        .await
        .unwrap();
    assert_eq!(out.data["user"], json!({ "id": "2" }));
    assert_eq!(out.data["post"], Value::Null);
    assert_eq!(out.errors.len(), 1);
    assert!(out.errors[0].message.contains("Post.Query.post"), "{}", out.errors[0].message);
    assert!(out.errors[0].message.contains("service unavailable"), "{}", out.errors[0].message);
    gateway.stop().await;
}

#[tokio::test]
async fn directories_refresh_on_the_broker_heartbeat() {
    let mesh = Mesh::with_heartbeat(Duration::from_millis(20));
    publish_node(&mesh.node("posts-a"), "main", &post()).await.unwrap();
    let mut slow = settings("main");
    slow.heartbeat_interval_ms = 60_000;
    let gateway = Gateway::builder("front")
        .settings(slow)
        .remote("Post")
        .start(Arc::new(mesh.node("gw")))
        .await
        .unwrap();
    let directory = gateway.state().directories["Post"].clone();
    assert_eq!(directory.active().len(), 1);

    publish_node(&mesh.node("posts-b"), "main", &post()).await.unwrap();
    timeout(PATIENCE, async {
        while directory.active().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    gateway.stop().await;
}

#[tokio::test]
async fn stop_withdraws_the_gateway_service() {
    let mesh = Mesh::new();
    let broker = Arc::new(mesh.node("gw"));
    let gateway = Gateway::builder("front")
        .settings(settings("main"))
        .node(user())
        .start(broker.clone())
        .await
        .unwrap();
    let front = ServiceName::new("front", "main");
    assert_eq!(broker.list_live_nodes(&front).await.unwrap().len(), 1);

    timeout(PATIENCE, gateway.stop()).await.unwrap();
    assert_eq!(gateway.outcome(), RunOutcome::Stopped);
    assert!(gateway.wait().await.is_ok());
    assert!(broker.list_live_nodes(&front).await.unwrap().is_empty());
}
