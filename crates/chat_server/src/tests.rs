// Include tests
#[cfg(test)]
mod tests {
    use crate::signaling::{
        ANSWER, ANSWER_SIGNAL, CONNECTED, ICE_CANDIDATE, ICE_CANDIDATE_SIGNAL, INITIALIZE, OFFER,
        OFFER_SIGNAL,
    };
    use crate::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::debug;

    fn small_config() -> ServiceConfig {
        ServiceConfig {
            max_users: 8,
            mailbox_capacity: 16,
            receive_timeout_secs: 1,
            idle_timeout_secs: 300,
            reap_interval_secs: 60,
        }
    }

    fn msg(name: &str, content: &str, command: &str, client_id: &str, group_id: &str) -> Message {
        Message {
            sender_name: name.to_string(),
            content: content.to_string(),
            command: command.to_string(),
            sender_client_id: client_id.to_string(),
            group_id: group_id.to_string(),
        }
    }

    /// Drains the mailbox until a response satisfies the predicate,
    /// skipping join/leave notices and other interleaved traffic.
    async fn recv_matching<F>(client: &Arc<Client>, pred: F) -> Response
    where
        F: Fn(&Response) -> bool,
    {
        for _ in 0..20 {
            match client.receive(Duration::from_millis(100)).await {
                Ok(response) if pred(&response) => return response,
                Ok(other) => debug!("skipping interleaved response: {:?}", other),
                Err(ChatError::TimeoutReached) => {}
                Err(e) => panic!("mailbox failed while waiting: {e}"),
            }
        }
        panic!("expected response never arrived");
    }

    /// Asserts that nothing matching the predicate is delivered within a
    /// short settle window.
    async fn assert_never<F>(client: &Arc<Client>, pred: F)
    where
        F: Fn(&Response) -> bool,
    {
        for _ in 0..3 {
            match client.receive(Duration::from_millis(50)).await {
                Ok(response) => assert!(
                    !pred(&response),
                    "unexpected response delivered: {response:?}"
                ),
                Err(ChatError::TimeoutReached) => {}
                Err(e) => panic!("mailbox failed while settling: {e}"),
            }
        }
    }

    /// Registers a client directly against the service and returns it.
    async fn registered(service: &Arc<ChatService>, name: &str, id: &str) -> Arc<Client> {
        service
            .register_client(name, id)
            .await
            .expect("registration should succeed");
        service.get_client(id).await.unwrap()
    }

    /// Puts a set of clients into a fresh group and returns it.
    async fn grouped(
        service: &Arc<ChatService>,
        name: &str,
        members: &[&Arc<Client>],
    ) -> Arc<Group> {
        let group = service.create_group(name).await.unwrap();
        for member in members {
            group.add_client((*member).clone()).await.unwrap();
            member.set_group_id(Some(group.id().to_string())).await;
        }
        group
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_issues_token_and_rejects_duplicates() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        // No client exists yet for this id, so /register is in scope.
        let response = registry
            .find_and_execute(msg("alice", "", "register", "client-a", ""))
            .await
            .unwrap();
        assert!(!response.is_error());
        assert!(!response.content.is_empty(), "token must be returned");
        assert_eq!(
            service.get_client("client-a").await.unwrap().auth_token(),
            response.content
        );

        // Same id again: rejected by the UnregisteredOnly scope.
        let duplicate = registry
            .find_and_execute(msg("alice2", "", "register", "client-a", ""))
            .await
            .unwrap();
        assert!(duplicate.is_error());

        // Direct registry duplicates are rejected too.
        let direct = service.register_client("alice3", "client-a").await;
        assert!(matches!(direct, Err(ChatError::AlreadyRegistered(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_name_length_is_validated() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        let too_short = registry
            .find_and_execute(msg("ab", "", "register", "short-id", ""))
            .await
            .unwrap();
        assert!(too_short.is_error());
        assert!(service.get_client("short-id").await.is_err());

        let long_name = "x".repeat(51);
        let too_long = registry
            .find_and_execute(msg(&long_name, "", "register", "long-id", ""))
            .await
            .unwrap();
        assert!(too_long.is_error());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_capacity_limit_is_enforced() {
        let mut config = small_config();
        config.max_users = 2;
        let service = create_service_with_config(config);

        registered(&service, "alice", "client-a").await;
        registered(&service, "bob", "client-b").await;

        let overflow = service.register_client("carol", "client-c").await;
        assert!(matches!(overflow, Err(ChatError::CapacityExceeded)));
        assert_eq!(service.client_count().await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_private_message_reaches_only_its_target() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        let carol = registered(&service, "carol", "client-c").await;

        let ack = registry
            .find_and_execute(msg("alice", "client-b psst", "private", "client-a", ""))
            .await
            .unwrap();
        assert!(!ack.is_error());

        let delivered = recv_matching(&bob, |r| r.content == "psst").await;
        assert_eq!(delivered.responder_name, "alice");
        assert_eq!(delivered.origin_client_id, "client-a");

        assert_never(&carol, |r| r.content == "psst").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_broadcast_respects_group_boundaries() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        let _alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        let carol = registered(&service, "carol", "client-c").await;
        let dave = registered(&service, "dave", "client-d").await;

        let alice = service.get_client("client-a").await.unwrap();
        grouped(&service, "devs", &[&alice, &bob]).await;

        // Grouped sender: only the other group member sees it.
        registry
            .find_and_execute(msg("alice", "standup time", "broadcast", "client-a", ""))
            .await
            .unwrap();
        let in_group = recv_matching(&bob, |r| r.content == "standup time").await;
        assert_eq!(in_group.responder_name, "alice");
        assert_never(&carol, |r| r.content == "standup time").await;

        // Global sender: reaches ungrouped clients, never group members.
        registry
            .find_and_execute(msg("carol", "lunch?", "broadcast", "client-c", ""))
            .await
            .unwrap();
        recv_matching(&dave, |r| r.content == "lunch?").await;
        assert_never(&bob, |r| r.content == "lunch?").await;
        assert_never(&alice, |r| r.content == "lunch?").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_quit_closes_mailbox_and_notifies_peers() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;

        let goodbye = registry
            .find_and_execute(msg("alice", "", "quit", "client-a", ""))
            .await
            .unwrap();
        assert!(!goodbye.is_error());

        assert!(service.get_client("client-a").await.is_err());
        recv_matching(&bob, |r| r.content.contains("left the chat")).await;

        // Further deliveries to the evicted id fail at lookup.
        let stale = service
            .echo("client-a", Response::ok("client-a", "server", "late"))
            .await;
        assert!(matches!(stale, Err(ChatError::ClientNotFound(_))));

        // The evicted mailbox drains then reports closure.
        loop {
            match alice.receive(Duration::from_millis(50)).await {
                Ok(_) => continue,
                Err(ChatError::ChannelClosed) => break,
                Err(e) => panic!("expected closed mailbox, got {e}"),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unregistered_callers_are_fenced_out() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        let fenced = registry
            .find_and_execute(msg("ghost", "boo", "broadcast", "nobody", ""))
            .await
            .unwrap();
        assert!(fenced.is_error());

        // Commands without a precondition still work.
        let open = registry
            .find_and_execute(msg("ghost", "", "time", "nobody", ""))
            .await
            .unwrap();
        assert!(!open.is_error());

        let unknown = registry
            .find_and_execute(msg("ghost", "", "dance", "nobody", ""))
            .await
            .unwrap();
        assert!(unknown.is_error());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_help_lists_registered_commands() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        let help = registry
            .find_and_execute(msg("anyone", "", "help", "nobody", ""))
            .await
            .unwrap();
        assert!(!help.is_error());
        for command in ["/help", "/time", "/users", "/register", "/quit", "/group"] {
            assert!(
                help.content.contains(command),
                "help output missing {command}: {}",
                help.content
            );
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_group_lifecycle_through_commands() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;

        let created = registry
            .find_and_execute(msg("alice", "create devs", "group", "client-a", ""))
            .await
            .unwrap();
        assert!(!created.is_error());
        let group_id = created.content.clone();
        assert!(service.get_group(&group_id).await.is_ok());

        let joined = registry
            .find_and_execute(msg("bob", "join devs", "group", "client-b", ""))
            .await
            .unwrap();
        assert!(!joined.is_error());
        assert_eq!(bob.group_id().await.as_deref(), Some(group_id.as_str()));
        assert_eq!(service.get_group(&group_id).await.unwrap().len().await, 2);

        // A second create while grouped is rejected.
        let re_create = registry
            .find_and_execute(msg("bob", "create other", "group", "client-b", ""))
            .await
            .unwrap();
        assert!(re_create.is_error());

        // Group names are unique, so a name-based join has one target.
        registered(&service, "carol", "client-c").await;
        let name_taken = registry
            .find_and_execute(msg("carol", "create devs", "group", "client-c", ""))
            .await
            .unwrap();
        assert!(name_taken.is_error());
        assert_eq!(service.groups_snapshot().await.len(), 1);

        let left = registry
            .find_and_execute(msg("bob", "leave", "group", "client-b", ""))
            .await
            .unwrap();
        assert!(!left.is_error());
        assert_eq!(bob.group_id().await, None);
        assert_eq!(service.get_group(&group_id).await.unwrap().len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_users_listing_is_scoped_to_the_room() {
        let service = create_service_with_config(small_config());
        let registry = PluginRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        registered(&service, "carol", "client-c").await;
        grouped(&service, "devs", &[&alice, &bob]).await;

        let in_group = registry
            .find_and_execute(msg("alice", "", "users", "client-a", ""))
            .await
            .unwrap();
        assert!(in_group.content.contains("bob"));
        assert!(!in_group.content.contains("carol"));

        let global = registry
            .find_and_execute(msg("carol", "", "users", "client-c", ""))
            .await
            .unwrap();
        assert!(global.content.contains("carol"));
        assert!(!global.content.contains("alice"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_idle_reaping_honors_activity() {
        let service = create_service_with_config(small_config());

        let alice = registered(&service, "alice", "client-a").await;
        registered(&service, "bob", "client-b").await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only alice keeps polling, so only bob ages out.
        let _ = alice.receive(Duration::from_millis(10)).await;
        let reaped = service.reap_idle(Duration::from_millis(40)).await;

        assert_eq!(reaped, 1);
        assert!(service.get_client("client-a").await.is_ok());
        assert!(service.get_client("client-b").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reaping_prunes_emptied_groups() {
        let service = create_service_with_config(small_config());
        let alice = registered(&service, "alice", "client-a").await;
        let group = grouped(&service, "devs", &[&alice]).await;
        let group_id = group.id().to_string();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let reaped = service.reap_idle(Duration::from_millis(10)).await;

        assert_eq!(reaped, 1);
        assert!(service.get_group(&group_id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_full_mailbox_drops_without_stalling_others() {
        let mut config = small_config();
        config.mailbox_capacity = 2;
        let service = create_service_with_config(config);
        let registry = PluginRegistry::new(service.clone());

        registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        let carol = registered(&service, "carol", "client-c").await;

        // Saturate bob's mailbox without draining it.
        for i in 0..4 {
            let _ = bob.send(Response::ok("client-b", "filler", i.to_string())).await;
        }

        registry
            .find_and_execute(msg("alice", "still here?", "broadcast", "client-a", ""))
            .await
            .unwrap();

        // Carol is unaffected by bob's saturated mailbox.
        recv_matching(&carol, |r| r.content == "still here?").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_call_negotiation_happy_path() {
        let service = create_service_with_config(small_config());
        let signaling = SignalingRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        let group = grouped(&service, "devs", &[&alice, &bob]).await;

        // name = initiator id, clientId = addressed peer.
        let init = signaling
            .find_and_execute(msg("client-a", "", INITIALIZE, "client-b", ""))
            .await
            .unwrap();
        assert!(init.is_signal_echo(), "unexpected: {init:?}");
        assert_eq!(alice.call_state("client-b").await, Some(CallState::OfferSent));
        assert_eq!(bob.call_state("client-a").await, Some(CallState::AnswerSent));

        // The pair record exists from initialize on, but stays unconnected
        // until both sides report a media connection.
        assert!(group.check_connection("client-a", "client-b").await);
        assert_eq!(
            group
                .connection_state("client-a", "client-b")
                .await
                .map(|state| state.connected),
            Some(false)
        );

        // An empty offer only announces intent locally; nothing relays.
        let placeholder = signaling
            .find_and_execute(msg("client-a", "", OFFER, "client-b", ""))
            .await
            .unwrap();
        assert!(placeholder.is_signal_echo());
        assert_never(&bob, |r| r.responder_name == OFFER_SIGNAL).await;

        let offered = signaling
            .find_and_execute(msg("client-a", "sdp-offer-x", OFFER, "client-b", ""))
            .await
            .unwrap();
        assert!(offered.is_signal_echo(), "unexpected: {offered:?}");
        let relayed_offer = recv_matching(&bob, |r| r.responder_name == OFFER_SIGNAL).await;
        assert_eq!(relayed_offer.content, "sdp-offer-x");
        assert_eq!(relayed_offer.origin_client_id, "client-a");

        let answered = signaling
            .find_and_execute(msg("client-b", "sdp-answer-y", ANSWER, "client-a", ""))
            .await
            .unwrap();
        assert!(answered.is_signal_echo(), "unexpected: {answered:?}");
        let relayed_answer = recv_matching(&alice, |r| r.responder_name == ANSWER_SIGNAL).await;
        assert_eq!(relayed_answer.content, "sdp-answer-y");

        let connected = signaling
            .find_and_execute(msg("client-a", "", CONNECTED, "client-b", ""))
            .await
            .unwrap();
        assert!(connected.is_signal_echo());
        assert!(group.check_connection("client-a", "client-b").await);
        assert!(group.check_connection("client-b", "client-a").await);
        assert_eq!(alice.call_state("client-b").await, Some(CallState::Connected));

        // Candidates relay verbatim once the pair record exists.
        signaling
            .find_and_execute(msg("client-a", "candidate:1 udp", ICE_CANDIDATE, "client-b", ""))
            .await
            .unwrap();
        let candidate = recv_matching(&bob, |r| r.responder_name == ICE_CANDIDATE_SIGNAL).await;
        assert_eq!(candidate.content, "candidate:1 udp");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_simultaneous_offers_produce_exactly_one_winner() {
        let service = create_service_with_config(small_config());
        let signaling = SignalingRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        grouped(&service, "devs", &[&alice, &bob]).await;

        signaling
            .find_and_execute(msg("client-a", "", INITIALIZE, "client-b", ""))
            .await
            .unwrap();

        // Both sides announce the offering role before either SDP lands.
        alice.set_call_state("client-b", CallState::OfferSent).await;
        bob.set_call_state("client-a", CallState::OfferSent).await;

        let from_a = signaling
            .find_and_execute(msg("client-a", "offer-from-a", OFFER, "client-b", ""))
            .await
            .unwrap();
        let from_b = signaling
            .find_and_execute(msg("client-b", "offer-from-b", OFFER, "client-a", ""))
            .await
            .unwrap();

        // The smaller id keeps the offer; the other side is told to back
        // off and its SDP never relays.
        assert!(from_a.is_signal_echo(), "unexpected: {from_a:?}");
        assert!(from_b.is_error(), "unexpected: {from_b:?}");
        assert_eq!(bob.call_state("client-a").await, Some(CallState::AnswerSent));

        let relayed = recv_matching(&bob, |r| r.responder_name == OFFER_SIGNAL).await;
        assert_eq!(relayed.content, "offer-from-a");
        assert_never(&alice, |r| r.responder_name == OFFER_SIGNAL).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_relay_preconditions_reject_out_of_order_signals() {
        let service = create_service_with_config(small_config());
        let signaling = SignalingRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        grouped(&service, "devs", &[&alice, &bob]).await;

        // Candidates need a pair record; none exists before initialize.
        let early_candidate = signaling
            .find_and_execute(msg("client-a", "candidate:1 udp", ICE_CANDIDATE, "client-b", ""))
            .await
            .unwrap();
        assert!(early_candidate.is_error(), "unexpected: {early_candidate:?}");
        assert_never(&bob, |r| r.responder_name == ICE_CANDIDATE_SIGNAL).await;

        // A non-empty answer requires the peer to be offering.
        signaling
            .find_and_execute(msg("client-a", "", INITIALIZE, "client-b", ""))
            .await
            .unwrap();
        alice.set_call_state("client-b", CallState::Stable).await;

        let stray_answer = signaling
            .find_and_execute(msg("client-b", "sdp-answer-y", ANSWER, "client-a", ""))
            .await
            .unwrap();
        assert!(stray_answer.is_error(), "unexpected: {stray_answer:?}");
        assert_never(&alice, |r| r.responder_name == ANSWER_SIGNAL).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_rejects_a_pair_already_negotiating() {
        let service = create_service_with_config(small_config());
        let signaling = SignalingRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        grouped(&service, "devs", &[&alice, &bob]).await;

        let first = signaling
            .find_and_execute(msg("client-a", "", INITIALIZE, "client-b", ""))
            .await
            .unwrap();
        assert!(first.is_signal_echo());

        // Either direction of a second initialize is refused.
        let second = signaling
            .find_and_execute(msg("client-b", "", INITIALIZE, "client-a", ""))
            .await
            .unwrap();
        assert!(second.is_error());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signaling_requires_shared_group_membership() {
        let service = create_service_with_config(small_config());
        let signaling = SignalingRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        registered(&service, "bob", "client-b").await;
        grouped(&service, "devs", &[&alice]).await;

        let rejected = signaling
            .find_and_execute(msg("client-a", "", INITIALIZE, "client-b", ""))
            .await
            .unwrap();
        assert!(rejected.is_error());

        let unregistered = signaling
            .find_and_execute(msg("nobody", "", INITIALIZE, "client-b", ""))
            .await
            .unwrap();
        assert!(unregistered.is_error());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_connection_rolls_negotiation_back() {
        let service = create_service_with_config(small_config());
        let signaling = SignalingRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        let group = grouped(&service, "devs", &[&alice, &bob]).await;

        signaling
            .find_and_execute(msg("client-a", "", INITIALIZE, "client-b", ""))
            .await
            .unwrap();

        // Failure notice lands in both mailboxes.
        signaling
            .find_and_execute(msg(
                "client-a",
                "ice gathering failed",
                crate::signaling::FAILED_CONNECTION,
                "client-b",
                "",
            ))
            .await
            .unwrap();
        recv_matching(&alice, |r| {
            r.responder_name == crate::signaling::FAILED_SIGNAL
        })
        .await;
        recv_matching(&bob, |r| {
            r.responder_name == crate::signaling::FAILED_SIGNAL
        })
        .await;

        // Terminal rollback clears state on both sides and in the ledger.
        signaling
            .find_and_execute(msg(
                "client-a",
                crate::signaling::ROLLBACK_DONE,
                crate::signaling::FAILED_CONNECTION,
                "client-b",
                "",
            ))
            .await
            .unwrap();
        assert_eq!(alice.call_state("client-b").await, None);
        assert_eq!(bob.call_state("client-a").await, None);
        assert!(!group.check_connection("client-a", "client-b").await);

        // Local purge mode: empty peer id cleans unconnected entries only.
        alice.set_call_state("client-x", CallState::OfferSent).await;
        alice.set_call_state("client-y", CallState::Connected).await;
        signaling
            .find_and_execute(msg(
                "client-a",
                "",
                crate::signaling::FAILED_CONNECTION,
                "",
                "",
            ))
            .await
            .unwrap();
        assert_eq!(alice.call_state("client-x").await, None);
        assert_eq!(alice.call_state("client-y").await, Some(CallState::Connected));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stable_rearms_both_roles() {
        let service = create_service_with_config(small_config());
        let signaling = SignalingRegistry::new(service.clone());

        let alice = registered(&service, "alice", "client-a").await;
        let bob = registered(&service, "bob", "client-b").await;
        grouped(&service, "devs", &[&alice, &bob]).await;

        signaling
            .find_and_execute(msg("client-a", "", INITIALIZE, "client-b", ""))
            .await
            .unwrap();
        signaling
            .find_and_execute(msg("client-a", "", crate::signaling::STABLE, "client-b", ""))
            .await
            .unwrap();
        signaling
            .find_and_execute(msg("client-b", "", crate::signaling::STABLE, "client-a", ""))
            .await
            .unwrap();

        assert_eq!(alice.call_state("client-b").await, Some(CallState::Stable));
        assert_eq!(bob.call_state("client-a").await, Some(CallState::Stable));

        // A settled pair can renegotiate: the offer relays again.
        let renegotiate = signaling
            .find_and_execute(msg("client-b", "fresh-offer", OFFER, "client-a", ""))
            .await
            .unwrap();
        assert!(renegotiate.is_signal_echo(), "unexpected: {renegotiate:?}");
        recv_matching(&alice, |r| r.content == "fresh-offer").await;
    }
}
