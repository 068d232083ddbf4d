//! End-to-end cluster test over TCP: one discovery node, two storage nodes
//! and one edge node on ephemeral ports.

use std::time::Duration;
use warble::protocol::{Reply, ReplyBody, Request, Status};
use warble::{Config, Server, TcpTransport, Tier, Transport};

fn config(tier: Tier, instance: u32) -> Config {
    Config::new(tier, instance)
        .with_bind("127.0.0.1")
        .with_port(0)
        .with_heartbeat_interval(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(20))
        .with_broadcast_delay(Duration::from_millis(20))
        .with_max_workers(16)
}

async fn start(config: Config) -> String {
    let server = Server::bind(config).await.unwrap();
    let location = server.location().to_string();
    tokio::spawn(server.run());
    location
}

/// Retry `request` against `location` until `done` accepts the reply.
async fn eventually(
    transport: &TcpTransport,
    location: &str,
    request: Request,
    done: impl Fn(&Reply) -> bool,
) -> Reply {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(reply) = transport.call(location, request.clone()).await {
                if done(&reply) {
                    return reply;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_publish_and_search_across_tiers() {
    let discovery = start(config(Tier::Discovery, 0)).await;
    start(config(Tier::Storage, 1).with_discovery(&discovery)).await;
    start(config(Tier::Storage, 2).with_discovery(&discovery)).await;
    let edge = start(config(Tier::Edge, 1).with_discovery(&discovery)).await;

    let transport = TcpTransport::new();

    let reply = eventually(&transport, &discovery, Request::FetchDirectory, |reply| {
        matches!(&reply.body, Some(ReplyBody::Directory { servers }) if servers.len() == 3)
    })
    .await;
    assert_eq!(reply.status, Status::Ok);
    // Let the last directory broadcast reach every node.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let publish = Request::Publish {
        content: "hello over tcp #warble #rust".into(),
        tags: Vec::new(),
    };
    let reply = eventually(&transport, &edge, publish, |reply| {
        reply.status == Status::Created
    })
    .await;
    assert!(matches!(reply.body, Some(ReplyBody::Clock { .. })));

    let search = Request::Search {
        tag: "warble".into(),
        version: None,
        clock: Default::default(),
    };
    let reply = eventually(&transport, &edge, search, |reply| {
        matches!(&reply.body, Some(ReplyBody::Feed { posts, .. }) if !posts.is_empty())
    })
    .await;
    match reply.body {
        Some(ReplyBody::Feed { tag, posts }) => {
            assert_eq!(tag, "warble");
            assert_eq!(posts, vec!["hello over tcp #warble #rust"]);
        }
        other => panic!("expected feed, got {:?}", other),
    }

    // Both storage nodes end up holding the post.
    let reply = eventually(
        &transport,
        &edge,
        Request::Snapshot { upper_bound: None },
        |reply| match &reply.body {
            Some(ReplyBody::Aggregate { snapshots }) => {
                snapshots.len() == 2
                    && snapshots
                        .values()
                        .all(|node| node.snapshot.versions.get("rust") == Some(&1))
            }
            _ => false,
        },
    )
    .await;
    assert_eq!(reply.status, Status::Ok);
}

#[tokio::test]
async fn test_unknown_peer_is_unreachable() {
    let transport = TcpTransport::with_connect_timeout(Duration::from_millis(200));
    let err = transport
        .call("127.0.0.1:1", Request::Probe)
        .await
        .unwrap_err();
    assert!(err.is_unreachable());
}
