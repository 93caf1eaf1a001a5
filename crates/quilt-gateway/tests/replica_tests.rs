// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]

mod common;

use common::{post, settings, user, PATIENCE};
use quilt_broker::{Broker, Mesh};
use quilt_gateway::{Gateway, GatewayError, RunOutcome};
use quilt_proto::ServiceName;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn replica_with_fewer_fragments_is_aborted_by_its_peer() {
    let mesh = Mesh::new();
    let first = Gateway::builder("front")
        .settings(settings("main"))
        .node(user())
        .node(post())
        .start(Arc::new(mesh.node("gw-1")))
        .await
        .unwrap();
    let second = Gateway::builder("front")
        .settings(settings("main"))
        .node(user())
        .start(Arc::new(mesh.node("gw-2")))
        .await
        .unwrap();

    let err = timeout(PATIENCE, second.wait()).await.unwrap().unwrap_err();
    let GatewayError::Aborted { from, reason } = err else {
        panic!("expected an abort, got {err}");
    };
    assert_eq!(&from, first.instance());
    assert!(reason.contains("missing [Post]"), "{reason}");

    assert_eq!(first.outcome(), RunOutcome::Running);
    let live = mesh
        .node("observer")
        .list_live_nodes(&ServiceName::new("front", "main"))
        .await
        .unwrap();
    assert_eq!(live, vec![first.instance().clone()]);
    first.stop().await;
}

#[tokio::test]
async fn identical_replicas_keep_running() {
    let mesh = Mesh::new();
    let start = |node: &str| {
        Gateway::builder("front")
            .settings(settings("main"))
            .node(user())
            .start(Arc::new(mesh.node(node)))
    };
    let first = start("gw-1").await.unwrap();
    let second = start("gw-2").await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(first.outcome(), RunOutcome::Running);
    assert_eq!(second.outcome(), RunOutcome::Running);
    let live = mesh
        .node("observer")
        .list_live_nodes(&ServiceName::new("front", "main"))
        .await
        .unwrap();
    assert_eq!(live.len(), 2);
    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn replicas_in_other_scopes_are_not_compared() {
    let mesh = Mesh::new();
    let blue = Gateway::builder("front")
        .settings(settings("blue"))
        .node(user())
        .node(post())
        .start(Arc::new(mesh.node("gw-1")))
        .await
        .unwrap();
    let green = Gateway::builder("front")
        .settings(settings("green"))
        .node(user())
        .start(Arc::new(mesh.node("gw-2")))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(blue.outcome(), RunOutcome::Running);
    assert_eq!(green.outcome(), RunOutcome::Running);
    blue.stop().await;
    green.stop().await;
}
