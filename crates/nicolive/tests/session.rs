//! Session manager discovery and subscriber accounting.

mod common;

use std::sync::Arc;

use common::{FakeDirectory, MockServer, chat, program, room, within};
use nicolive::{
    Channel, FeedConfig, NicoliveError, OFFICIAL_TAG, SessionManager, SessionRegistry,
    SocketOptions, TaskGroup,
};
use serde_json::json;

fn session(channel: Channel, directory: Arc<FakeDirectory>) -> Arc<SessionManager> {
    let options = SocketOptions {
        user_agent: "nicolive-test".to_string(),
        feed: FeedConfig::default(),
    };
    Arc::new(SessionManager::new(
        channel,
        directory,
        options,
        TaskGroup::new(),
    ))
}

fn jk1() -> Channel {
    Channel::new("jk1").with_tags(["jk1"])
}

fn directory(server: &MockServer) -> Arc<FakeDirectory> {
    Arc::new(FakeDirectory::new(server.url()).with_programs("jk1", vec![program("lv1", &["jk1"])]))
}

mod discovery_tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_without_tags_is_unsupported() {
        let directory = Arc::new(FakeDirectory::new("ws://127.0.0.1:9"));
        let manager = session(Channel::new("jk1"), directory.clone());

        assert!(manager.acquire_socket().await.is_none());
        assert_eq!(directory.searches(), 0);
        assert!(directory.lookups().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_on_air_is_unsupported() {
        let directory = Arc::new(FakeDirectory::new("ws://127.0.0.1:9"));
        let manager = session(Channel::new("jk1").with_tags(["jk1", "jk1b"]), directory.clone());

        assert!(manager.acquire_socket().await.is_none());
        assert_eq!(directory.searches(), 2);
        assert!(manager.subscribe().await.is_none());
        assert_eq!(manager.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_reuses_live_socket() {
        let mut server = MockServer::start().await;
        let directory = directory(&server);
        let manager = session(jk1(), directory.clone());

        let first = manager.acquire_socket().await.expect("socket");
        server.expect_start_watching().await;
        let second = manager.acquire_socket().await.expect("socket");

        assert_eq!(first, second);
        assert_eq!(directory.searches(), 1);
        assert_eq!(directory.lookups(), vec!["lv1"]);
        manager.close();
    }

    #[tokio::test]
    async fn test_concurrent_acquire_discovers_once() {
        let server = MockServer::start().await;
        let directory = directory(&server);
        let manager = session(jk1(), directory.clone());

        let (a, b) = tokio::join!(manager.acquire_socket(), manager.acquire_socket());
        assert_eq!(a.expect("socket"), b.expect("socket"));
        assert_eq!(directory.searches(), 1);
        manager.close();
    }

    #[tokio::test]
    async fn test_first_match_across_tags() {
        let server = MockServer::start().await;
        let directory = Arc::new(
            FakeDirectory::new(server.url())
                .with_failing_tag("broken")
                .with_programs("jk1", vec![program("lv7", &["jk1"]), program("lv8", &["jk1"])]),
        );
        let manager = session(
            Channel::new("jk1").with_tags(["broken", "jk1", "unused"]),
            directory.clone(),
        );

        assert!(manager.acquire_socket().await.is_some());
        assert_eq!(directory.searches(), 2);
        assert_eq!(directory.lookups(), vec!["lv7"]);
        manager.close();
    }

    #[tokio::test]
    async fn test_official_channel_requires_official_tag() {
        let server = MockServer::start().await;
        let directory = Arc::new(FakeDirectory::new(server.url()).with_programs(
            "jk1",
            vec![
                program("lv_fan", &["jk1"]),
                program("lv_official", &["jk1", OFFICIAL_TAG]),
            ],
        ));
        let manager = session(jk1().official(true), directory.clone());

        assert!(manager.acquire_socket().await.is_some());
        assert_eq!(directory.lookups(), vec!["lv_official"]);
        manager.close();
    }

    #[tokio::test]
    async fn test_rediscovers_after_termination() {
        let mut server = MockServer::start().await;
        let mut replacement = MockServer::start().await;
        let directory = directory(&server);
        let manager = session(jk1(), directory.clone());

        let first = manager.acquire_socket().await.expect("socket");
        server.expect_start_watching().await;
        server.send(json!({ "type": "disconnect", "data": { "reason": "END_PROGRAM" } }));
        within(first.terminated()).await;
        assert!(manager.current_socket().is_none());

        directory.set_socket_url(replacement.url());
        let second = manager.acquire_socket().await.expect("socket");
        replacement.expect_start_watching().await;

        assert_ne!(first, second);
        assert_eq!(second.url(), replacement.url());
        assert_eq!(directory.searches(), 2);
        manager.close();
    }
}

mod subscriber_tests {
    use super::*;

    #[tokio::test]
    async fn test_last_subscriber_closes_socket() {
        let mut server = MockServer::start().await;
        let manager = session(jk1(), directory(&server));

        for _ in 0..3 {
            manager.add_subscriber();
        }
        let socket = manager.acquire_socket().await.expect("socket");
        server.expect_start_watching().await;

        assert_eq!(manager.remove_subscriber().unwrap(), 2);
        assert_eq!(manager.remove_subscriber().unwrap(), 1);
        assert!(socket.is_active());

        assert_eq!(manager.remove_subscriber().unwrap(), 0);
        within(socket.terminated()).await;
        server.closed().await;
        assert!(manager.current_socket().is_none());
    }

    #[tokio::test]
    async fn test_remove_without_subscribers_fails() {
        let directory = Arc::new(FakeDirectory::new("ws://127.0.0.1:9"));
        let manager = session(jk1(), directory);

        let err = manager.remove_subscriber().unwrap_err();
        assert!(matches!(err, NicoliveError::SubscriberUnderflow(id) if id == "jk1"));
        assert_eq!(manager.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_relays_and_unsubscribes_on_drop() {
        let mut server = MockServer::start().await;
        let mut messages = MockServer::start().await;
        let manager = session(jk1(), directory(&server));

        let mut subscription = manager.subscribe().await.expect("subscription");
        let other = manager.subscribe().await.expect("subscription");
        assert_eq!(manager.subscriber_count(), 2);
        assert_eq!(subscription.socket(), other.socket());

        server.expect_start_watching().await;
        server.send(room(messages.url(), "M.1"));
        messages.recv_json().await;
        messages.send(chat(1, 1_600_000_000, "hello", "184"));

        let comment = within(subscription.comments().recv())
            .await
            .expect("comment");
        assert_eq!(comment.source, "jk1");
        assert_eq!(comment.text, "hello");
        assert!(comment.commands.is_empty());

        let socket = subscription.socket().clone();
        drop(other);
        assert!(socket.is_active());
        drop(subscription);
        assert_eq!(manager.subscriber_count(), 0);

        within(socket.terminated()).await;
        messages.closed().await;
        server.closed().await;
    }
}

mod registry_tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_lookup_and_shutdown() {
        let mut server = MockServer::start().await;
        let directory = directory(&server);
        let registry = SessionRegistry::new(
            [jk1(), Channel::new("jk2").with_tags(["jk2"])],
            directory,
            "nicolive-test",
            FeedConfig::default(),
        );

        assert_eq!(registry.channel_ids(), vec!["jk1", "jk2"]);
        assert!(registry.get("jk9").is_none());

        let manager = registry.get("jk1").expect("jk1 session");
        let socket = manager.acquire_socket().await.expect("socket");
        server.expect_start_watching().await;

        within(registry.shutdown()).await;
        assert!(!socket.is_active());
        assert!(registry.tasks().is_empty());
        server.closed().await;
    }
}
