// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]

mod common;

use common::{post, settings, user, PATIENCE};
use futures::StreamExt;
use quilt_broker::{Broker, Mesh};
use quilt_gateway::{publish_node, Gateway, GatewayClient, GatewayError, GatewayHandle};
use quilt_proto::{QueryPayload, ServiceName};
use quilt_resolve::Handler;
use quilt_schema::Node;
use serde_json::json;
use std::sync::Arc;
use tokio::time::timeout;

fn invoice() -> Node {
    Node::builder("Invoice")
        .type_text("type Invoice { total: Int }\nextend type Query { invoice: Invoice }")
        .query("invoice", Handler::value(json!({ "total": 120 })))
        .build()
        .unwrap()
}

async fn two_gateways(mesh: &Mesh) -> (GatewayHandle, GatewayHandle) {
    publish_node(&mesh.node("posts"), "main", &post()).await.unwrap();
    let front = Gateway::builder("front")
        .settings(settings("main"))
        .node(user())
        .start(Arc::new(mesh.node("gw-front")))
        .await
        .unwrap();
    let billing = Gateway::builder("billing")
        .settings(settings("main"))
        .node(invoice())
        .remote("Post")
        .start(Arc::new(mesh.node("gw-billing")))
        .await
        .unwrap();
    (front, billing)
}

#[tokio::test]
async fn gateway_directive_forwards_to_the_named_gateway() {
    let mesh = Mesh::new();
    let (front, billing) = two_gateways(&mesh).await;

    let out = timeout(
        PATIENCE,
        front.execute(QueryPayload::new("query Totals @gateway(name: \"billing\") { invoice { total } }")),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(out.errors.is_empty(), "{:?}", out.errors);
    assert_eq!(out.data, json!({ "invoice": { "total": 120 } }));

    // Naming the receiving gateway itself runs the document locally.
    let out = front
        .execute(QueryPayload::new("query @gateway(name: \"front\") { user(id: \"3\") { id } }"))
        .await
        .unwrap();
    assert_eq!(out.data, json!({ "user": { "id": "3" } }));

    front.stop().await;
    billing.stop().await;
}

#[tokio::test]
async fn forwarded_documents_keep_their_variables() {
    let mesh = Mesh::new();
    let (front, billing) = two_gateways(&mesh).await;

    let mut payload =
        QueryPayload::new("query ($id: ID!) @gateway(name: \"front\") { user(id: $id) { id name } }");
    payload.variables.insert("id".into(), json!("5"));
    let out = timeout(PATIENCE, billing.execute(payload)).await.unwrap().unwrap();
    assert!(out.errors.is_empty(), "{:?}", out.errors);
    assert_eq!(out.data, json!({ "user": { "id": "5", "name": "user-5" } }));

    let mut payload =
        QueryPayload::new("query ($gw: String) @gateway(name: $gw) { user(id: \"1\") { id } }");
    payload.variables.insert("gw".into(), json!("front"));
    let err = billing.execute(payload).await.unwrap_err();
    assert!(matches!(err, GatewayError::Federation(_)), "{err}");

    front.stop().await;
    billing.stop().await;
}

#[tokio::test]
async fn client_routes_to_default_or_named_gateway() {
    let mesh = Mesh::new();
    let (front, billing) = two_gateways(&mesh).await;
    let client = GatewayClient::new(Arc::new(mesh.node("app")), "main", "front");

    let out = client.query(QueryPayload::new("{ user(id: \"9\") { name } }")).await.unwrap();
    assert_eq!(out.data, json!({ "user": { "name": "user-9" } }));

    let out = client
        .query(QueryPayload::new("query @gateway(name: \"billing\") { post { title } }"))
        .await
        .unwrap();
    assert_eq!(out.data, json!({ "post": { "title": "HELLO" } }));

    let stream = client
        .subscribe(QueryPayload::new("subscription @gateway(name: \"billing\") { posted { title } }"))
        .await
        .unwrap();
    let titles: Vec<_> = timeout(PATIENCE, stream.collect::<Vec<_>>())
        .await
        .unwrap()
        .into_iter()
        .map(|response| response.unwrap().data["posted"]["title"].clone())
        .collect();
    assert_eq!(titles, vec![json!("ONE"), json!("TWO")]);

    front.stop().await;
    billing.stop().await;
}

#[tokio::test]
async fn unknown_gateways_are_unavailable() {
    let mesh = Mesh::new();
    let (front, billing) = two_gateways(&mesh).await;
    let err = front
        .execute(QueryPayload::new("query @gateway(name: \"nowhere\") { ping }"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::ServiceUnavailable(_)), "{err}");

    let err = front
        .execute(QueryPayload::new("query @gateway { ping }"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Federation(_)), "{err}");

    front.stop().await;
    billing.stop().await;
    assert!(mesh.node("app").list_live_nodes(&ServiceName::new("billing", "main")).await.unwrap().is_empty());
}
