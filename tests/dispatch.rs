// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use corral_lib::actions::ActionError;
    use corral_lib::client::{ClientError, Connector, ControlPlane};
    use corral_lib::dispatch::{
        action_fn, fanout, Action, DispatchError, DispatchOptions, Mode, Outcome, Payload,
    };
    use corral_lib::path::Identifier;
    use corral_lib::render::{OutputFormat, Render, Renderer};
    use corral_lib::selector::SelectError;
    use corral_lib::{actions, dispatch, LogStream};

    use corral_lib::test_env::*;

    /// Create a TestEnvironment with three installed services, `web2` being frozen by config.
    fn test_env_helper(test_id: &str) -> TestEnvironment {
        let env = TestEnvironment::new(test_id.to_string());
        env.install("web1", "[\"app#1\"]\nstart = \"echo up\"");
        env.install("web2", "frozen = true");
        env.install("db1", "");
        env
    }

    fn targets(results: &[dispatch::TargetResult]) -> Vec<String> {
        results.iter().map(|r| r.target.to_string()).collect()
    }

    #[tokio::test]
    async fn local_freeze_of_unfrozen_web_services() {
        let env = test_env_helper("local_freeze");
        let client = Arc::new(FakeControlPlane::new());
        let dispatcher = env.dispatcher(client.clone(), false);
        let store = Arc::new(env.store());

        let options = DispatchOptions::builder("web*+!frozen=true")
            .local(true)
            .build()
            .unwrap();
        let action = Action::new("freeze").with_local(actions::set_frozen(store.clone(), true));

        let outcome = dispatcher.dispatch(&options, &action).await.unwrap();
        assert_eq!(outcome.mode, Mode::Local);
        assert_eq!(targets(&outcome.results), vec!["web1"]);
        assert_eq!(outcome.results[0].node, "n1");
        outcome.finish().await.unwrap();

        assert!(store.is_frozen(&Identifier::parse_path("web1").unwrap()));
        assert!(!store.is_frozen(&Identifier::parse_path("web2").unwrap()));
        assert!(client.calls().is_empty());

        // The flag written by freeze is what the `frozen` predicate sees.
        let unfrozen = dispatcher
            .select_objects("web*+!frozen=true", true)
            .await
            .unwrap();
        assert!(unfrozen.is_empty());
    }

    #[tokio::test]
    async fn union_with_negated_missing_name_is_everything() {
        let env = test_env_helper("union_negated_missing");
        let dispatcher = env.dispatcher(Arc::new(FakeControlPlane::new()), false);
        let selected = dispatcher.select_objects("web*,!frozen", true).await.unwrap();
        let selected: Vec<String> = selected.iter().map(|id| id.to_string()).collect();
        assert_eq!(selected, vec!["web1", "web2", "db1"]);
    }

    #[tokio::test]
    async fn local_start_runs_resource_commands() {
        let env = test_env_helper("local_start");
        let dispatcher = env.dispatcher(Arc::new(FakeControlPlane::new()), true);
        let store = Arc::new(env.store());

        let options = DispatchOptions::builder("web1")
            .rids(vec!["app#1".to_string()])
            .target(Some("started".to_string()))
            .build()
            .unwrap();
        let action = Action::new("start").with_local(actions::run_resources(
            store,
            options.resources().clone(),
            actions::ResourceAction::Start,
        ));

        let outcome = dispatcher.dispatch(&options, &action).await.unwrap();
        assert_eq!(outcome.mode, Mode::Local);
        match outcome.results[0].data.as_ref() {
            Some(Payload::Commands(runs)) => {
                assert_eq!(runs.len(), 1);
                assert_eq!(runs[0].stdout, "up");
            }
            other => panic!("expected command runs, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remote_object_action() {
        let env = test_env_helper("remote_object_action");
        let client = Arc::new(FakeControlPlane::new());
        client.answer_objects("web*", &["web1", "prod/svc/web3"]);
        let dispatcher = env.dispatcher(client.clone(), true);

        let options = DispatchOptions::builder("web*").build().unwrap();
        let action = Action::new("restart").with_params(serde_json::json!({"force": true}));

        let outcome = dispatcher.dispatch(&options, &action).await.unwrap();
        assert_eq!(outcome.mode, Mode::Remote);
        assert_eq!(targets(&outcome.results), vec!["prod/svc/web3", "web1"]);
        assert!(outcome.results.iter().all(|r| r.node == "n2"));
        assert!(outcome.error.is_none());

        let posted = client
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::ObjectAction { .. }))
            .count();
        assert_eq!(posted, 2);
    }

    #[tokio::test]
    async fn node_selector_takes_precedence_over_target() {
        let env = test_env_helper("node_precedence");
        let client = Arc::new(FakeControlPlane::new());
        client.answer_nodes("n*", &["n1", "n2"]);
        let dispatcher = env.dispatcher(client.clone(), false);

        let options = DispatchOptions::builder("")
            .node_selector("n*")
            .target(Some("frozen".to_string()))
            .build()
            .unwrap();
        let action = Action::new("freeze");

        let outcome = dispatcher.dispatch(&options, &action).await.unwrap();
        assert_eq!(outcome.mode, Mode::Remote);
        assert_eq!(targets(&outcome.results), vec!["n1", "n2"]);
        assert!(client
            .calls()
            .iter()
            .all(|c| !matches!(c, Call::Orchestration { .. })));
    }

    #[tokio::test]
    async fn node_action_timeout() {
        let env = test_env_helper("node_action_timeout");
        let client = Arc::new(FakeControlPlane::new());
        client.answer_nodes("n1", &["n1"]);
        let dispatcher = env.dispatcher(client, true);

        let options = DispatchOptions::builder("")
            .node_selector("n1")
            .build()
            .unwrap();
        let action = Action::new("hang").with_timeout(Some(Duration::from_millis(20)));

        let outcome = dispatcher.dispatch(&options, &action).await.unwrap();
        let errors = outcome.finish().await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.to_string().starts_with("n1: timed out"));
    }

    #[tokio::test]
    async fn async_dispatch_waits_for_terminal_events() {
        let env = test_env_helper("async_wait");
        let client = Arc::new(FakeControlPlane::new());
        client.answer_objects("web*", &["web1", "web2"]);
        client.push_event("success", "web1");
        client.push_event("error", "web2");
        let dispatcher = env.dispatcher(client.clone(), true);

        let options = DispatchOptions::builder("web*")
            .target(Some("started".to_string()))
            .wait(Some(Duration::from_secs(5)))
            .build()
            .unwrap();
        let outcome = dispatcher
            .dispatch(&options, &Action::new("start"))
            .await
            .unwrap();
        assert_eq!(outcome.mode, Mode::Async);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| r.is_ok()));

        let errors = outcome.finish().await.unwrap_err();
        assert_eq!(errors.to_string(), "web2: orchestration failed");

        let calls = client.calls();
        let events_at = calls
            .iter()
            .position(|c| matches!(c, Call::Events(_)))
            .unwrap();
        let first_post = calls
            .iter()
            .position(|c| matches!(c, Call::Orchestration { .. }))
            .unwrap();
        assert!(events_at < first_post);
    }

    #[tokio::test]
    async fn refused_orchestration_is_a_target_error() {
        let env = test_env_helper("async_refused");
        let client = Arc::new(FakeControlPlane::new());
        client.answer_objects("*", &["web1", "web2"]);
        client.refuse("web2");
        let dispatcher = env.dispatcher(client.clone(), true);

        let options = DispatchOptions::builder("*")
            .target(Some("placed@n2".to_string()))
            .destination(vec!["n2".to_string()])
            .build()
            .unwrap();
        let outcome = dispatcher
            .dispatch(&options, &Action::new("switch"))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
        let errors = outcome.finish().await.unwrap_err();
        assert_eq!(errors.to_string(), "web2: orchestration refused: busy");
        assert!(client.calls().contains(&Call::Orchestration {
            path: "web1".to_string(),
            target: "placed@n2".to_string(),
            destination: vec!["n2".to_string()],
        }));
    }

    #[tokio::test]
    async fn unreachable_daemon_falls_back_without_context() {
        let env = test_env_helper("fallback_without_context");
        let client = Arc::new(FakeControlPlane::new());
        client.set_unreachable(true);
        let dispatcher = env.dispatcher(client, false);

        let options = DispatchOptions::builder("web*")
            .target(Some("stopped".to_string()))
            .build()
            .unwrap();
        let outcome = dispatcher
            .dispatch(&options, &Action::new("stop"))
            .await
            .unwrap();
        assert_eq!(targets(&outcome.results), vec!["web1", "web2"]);
        let errors = outcome.finish().await.unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn unreachable_daemon_is_fatal_with_context() {
        let env = test_env_helper("strict_with_context");
        let client = Arc::new(FakeControlPlane::new());
        client.set_unreachable(true);
        let dispatcher = env.dispatcher(client, true);

        let options = DispatchOptions::builder("web*").build().unwrap();
        match dispatcher.dispatch(&options, &Action::new("restart")).await {
            Err(DispatchError::Select(SelectError::Daemon(_))) => {}
            Err(e) => panic!("expected a resolution error, got {e}"),
            Ok(_) => panic!("expected a resolution error"),
        }
    }

    #[tokio::test]
    async fn local_mode_needs_a_local_body() {
        let env = test_env_helper("local_unsupported");
        let client = Arc::new(FakeControlPlane::new());
        let dispatcher = env.dispatcher(client.clone(), false);

        let options = DispatchOptions::builder("web1").local(true).build().unwrap();
        match dispatcher.dispatch(&options, &Action::new("switch")).await {
            Err(DispatchError::LocalUnsupported(name)) => assert_eq!(name, "switch"),
            Err(e) => panic!("expected LocalUnsupported, got {e}"),
            Ok(_) => panic!("expected LocalUnsupported"),
        }
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn watch_renders_snapshot_and_events() {
        let env = test_env_helper("watch");
        let client = Arc::new(FakeControlPlane::new());
        client.answer_objects("web1", &["web1"]);
        client.push_event("progress", "web1");
        let dispatcher = env.dispatcher(client, true);

        let options = DispatchOptions::builder("web1")
            .watch(true)
            .build()
            .unwrap();
        let outcome = dispatcher
            .dispatch(&options, &Action::new("restart"))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.watch().is_some());
        outcome.finish().await.unwrap();

        assert_eq!(env.output.contents(), "web1 up\nprogress web1\n");
    }

    #[tokio::test]
    async fn watch_setup_failure_aborts() {
        let env = test_env_helper("watch_setup_failure");
        let client = Arc::new(FakeControlPlane::new());
        client.set_unreachable(true);
        let dispatcher = env.dispatcher(client, false);
        let store = Arc::new(env.store());

        let options = DispatchOptions::builder("web1")
            .local(true)
            .watch(true)
            .build()
            .unwrap();
        let action = Action::new("freeze").with_local(actions::set_frozen(store.clone(), true));
        assert!(matches!(
            dispatcher.dispatch(&options, &action).await,
            Err(DispatchError::Events(_))
        ));
        assert!(!store.is_frozen(&Identifier::parse_path("web1").unwrap()));
    }

    #[tokio::test]
    async fn watch_failure_after_start_is_reported() {
        let env = test_env_helper("watch_failure_after_start");
        let client = Arc::new(FakeControlPlane::new());
        client.answer_objects("web1", &["web1"]);
        client.fail_status();
        let dispatcher = env.dispatcher(client, true);

        let options = DispatchOptions::builder("web1")
            .watch(true)
            .build()
            .unwrap();
        let outcome = dispatcher
            .dispatch(&options, &Action::new("restart"))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.error.is_none());

        let errors = outcome.finish().await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.to_string(),
            "watch: server fault: Internal Server Error: status unavailable"
        );
    }

    #[tokio::test]
    async fn empty_selection_is_not_an_error() {
        let env = test_env_helper("empty_selection");
        let client = Arc::new(FakeControlPlane::new());
        client.answer_objects("nothing*", &[]);
        let dispatcher = env.dispatcher(client.clone(), true);
        let store = Arc::new(env.store());

        let options = DispatchOptions::builder("nothing*")
            .local(true)
            .build()
            .unwrap();
        let action = Action::new("freeze").with_local(actions::set_frozen(store, true));
        let outcome = dispatcher.dispatch(&options, &action).await.unwrap();
        assert_eq!(outcome.mode, Mode::Local);
        assert!(outcome.results.is_empty());
        assert!(outcome.error.is_none());
        outcome.finish().await.unwrap();

        let options = DispatchOptions::builder("nothing*").build().unwrap();
        let outcome = dispatcher
            .dispatch(&options, &Action::new("restart"))
            .await
            .unwrap();
        assert_eq!(outcome.mode, Mode::Remote);
        assert!(outcome.results.is_empty());
        assert!(outcome.error.is_none());
        outcome.finish().await.unwrap();

        let options = DispatchOptions::builder("nothing*")
            .target(Some("started".to_string()))
            .wait(Some(Duration::from_secs(5)))
            .build()
            .unwrap();
        let outcome = dispatcher
            .dispatch(&options, &Action::new("start"))
            .await
            .unwrap();
        assert_eq!(outcome.mode, Mode::Async);
        assert!(outcome.results.is_empty());
        outcome.finish().await.unwrap();

        assert!(client.calls().iter().all(|c| !matches!(
            c,
            Call::ObjectAction { .. } | Call::Orchestration { .. }
        )));
    }

    #[tokio::test]
    async fn server_override_uses_another_control_plane() {
        let env = test_env_helper("server_override");
        let configured = Arc::new(FakeControlPlane::new());
        let other = Arc::new(FakeControlPlane::new());
        other.answer_objects("web*", &["web1"]);

        let connected = Arc::clone(&other);
        let connector: Connector = Arc::new(move |server: &str| {
            assert_eq!(server, "http://other:1215");
            Ok::<_, ClientError>(Arc::clone(&connected) as Arc<dyn ControlPlane>)
        });
        // Without a context the configured control plane would lead to local mode.
        let dispatcher = env
            .dispatcher(configured.clone(), false)
            .with_connector(connector);

        let options = DispatchOptions::builder("web*")
            .server(Some("http://other:1215".to_string()))
            .build()
            .unwrap();
        let outcome = dispatcher
            .dispatch(&options, &Action::new("restart"))
            .await
            .unwrap();
        assert_eq!(outcome.mode, Mode::Remote);
        assert_eq!(targets(&outcome.results), vec!["web1"]);
        outcome.finish().await.unwrap();

        assert!(configured.calls().is_empty());
        assert!(other.calls().contains(&Call::ObjectAction {
            path: "web1".to_string(),
            action: "restart".to_string(),
            node_selector: String::new(),
        }));
    }

    #[tokio::test]
    async fn server_override_without_connector() {
        let env = test_env_helper("server_override_without_connector");
        let dispatcher = env.dispatcher(Arc::new(FakeControlPlane::new()), false);

        let options = DispatchOptions::builder("web*")
            .server(Some("http://other:1215".to_string()))
            .build()
            .unwrap();
        match dispatcher.dispatch(&options, &Action::new("restart")).await {
            Err(DispatchError::Connect { server, .. }) => assert_eq!(server, "http://other:1215"),
            Err(e) => panic!("expected a connect error, got {e}"),
            Ok(_) => panic!("expected a connect error"),
        }
    }

    #[tokio::test]
    async fn output_format_of_the_dispatch() {
        let env = test_env_helper("output_format");
        let dispatcher = env.dispatcher(Arc::new(FakeControlPlane::new()), false);

        let options = DispatchOptions::builder("web1")
            .local(true)
            .output(Some(OutputFormat::Json))
            .build()
            .unwrap();
        let action = Action::new("ls").with_local(actions::ls());
        let outcome = dispatcher.dispatch(&options, &action).await.unwrap();
        outcome.render();

        let printed: serde_json::Value = serde_json::from_str(&env.output.contents()).unwrap();
        assert_eq!(printed[0]["path"], "web1");
        assert_eq!(printed[0]["node"], "n1");
    }

    #[tokio::test]
    async fn outcome_from_results_keeps_failures() {
        let targets = vec![
            Identifier::parse_path("web1").unwrap(),
            Identifier::parse_path("web2").unwrap(),
        ];
        let action = action_fn(|target: Identifier| async move {
            if target.to_string() == "web2" {
                return Err(ActionError::Failed("no such thing".to_string()));
            }
            Ok(Payload::Path(target))
        });
        let results = fanout::run(&targets, action, None, "n1").await;

        let stream = Arc::new(LogStream::new_buffer());
        let renderer: Arc<dyn Render> =
            Arc::new(Renderer::new(OutputFormat::Human, Arc::clone(&stream)));
        let outcome = Outcome::from_results(Mode::Local, results, renderer);
        outcome.render();
        assert_eq!(stream.contents(), "web1\n");

        let errors = outcome.finish().await.unwrap_err();
        assert_eq!(errors.to_string(), "web2: no such thing");
    }

    #[test]
    fn client_error_is_reported_by_connect() {
        let e = DispatchError::Connect {
            server: "http://other:1215".to_string(),
            source: ClientError::Setup("bad CA".to_string()),
        };
        assert_eq!(
            e.to_string(),
            "could not connect to http://other:1215: could not set up client: bad CA"
        );
    }
}
