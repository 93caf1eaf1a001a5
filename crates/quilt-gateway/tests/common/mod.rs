// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::unwrap_used)]

use quilt_app_core::settings::GatewaySettings;
use quilt_resolve::{BoxError, Call, Handler};
use quilt_schema::Node;
use serde_json::{json, Value};
use std::time::Duration;

/// Upper bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(5);

pub fn settings(scope: &str) -> GatewaySettings {
    GatewaySettings {
        scope: scope.to_owned(),
        poll_interval_ms: 10,
        heartbeat_interval_ms: 50,
        directory_retries: 2,
        directory_retry_delay_ms: 5,
        ..GatewaySettings::default()
    }
}

pub fn user() -> Node {
    Node::builder("User")
        .type_text("type User { id: ID! name: String }\nextend type Query { user(id: ID!): User }")
        .query(
            "user",
            Handler::plain(|call: Call| async move { Ok(json!({ "id": call.arg("id").cloned() })) }),
        )
        .field(
            "name",
            Handler::plain(|call: Call| async move {
                Ok(json!(format!("user-{}", call.parent["id"].as_str().unwrap_or("?"))))
            }),
        )
        .build()
        .unwrap()
}

pub fn post() -> Node {
    Node::builder("Post")
        .type_text(
            "type Post { title: String author: String }\n\
             extend type Query { post: Post }\n\
             extend type Subscription { posted: Post }",
        )
        .query("post", Handler::value(json!({ "title": "hello", "author": "ada" })))
        .subscription(
            "posted",
            Handler::subscribe(|_| async {
                use futures::StreamExt;
                let items: Vec<Result<Value, BoxError>> =
                    vec![Ok(json!({ "title": "one" })), Ok(json!({ "title": "two" }))];
                Ok(futures::stream::iter(items).boxed())
            }),
        )
        .field(
            "title",
            Handler::plain(|call: Call| async move {
                Ok(json!(call.parent["title"].as_str().unwrap_or_default().to_uppercase()))
            }),
        )
        .build()
        .unwrap()
}
