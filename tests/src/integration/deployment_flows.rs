//! # Deployment Flows
//!
//! The DM drives a three-machine application through deployment, start and
//! undeployment, and keeps its own view in sync from agent notifications.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shared_bus::{InMemoryClient, MessageQueue, MessagingClient, MessagingContext, OwnerProperties};
    use shared_types::{InstanceStatus, Message};
    use stackyard_runtime::NodeRuntime;

    use crate::fixtures::{eventually, lamp_model, node_config, path, start_node, wait_for_status, APP};

    const ALL: [&str; 6] = ["/db-vm", "/db-vm/mysql", "/web-vm", "/web-vm/tomcat", "/lb-vm", "/lb-vm/apache"];

    #[tokio::test]
    async fn test_every_machine_comes_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let node = start_node(tmp.path(), &lamp_model()).await;
        let dm = node.dm();

        for root in ["db-vm", "web-vm", "lb-vm"] {
            assert!(eventually(|| dm.machine(APP, root).is_some_and(|m| m.alive)).await);
            assert!(dm.machine(APP, root).unwrap().last_heartbeat.is_some());
        }
        assert!(eventually(|| dm.awaiting_count(APP, "web-vm") == 0).await);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deploy_and_start_across_machines() {
        let tmp = tempfile::tempdir().unwrap();
        let node = start_node(tmp.path(), &lamp_model()).await;
        let dm = node.dm();

        dm.deploy_and_start_all(APP).await.unwrap();

        let db = node.agent_view(APP, "db-vm").unwrap();
        let web = node.agent_view(APP, "web-vm").unwrap();
        let lb = node.agent_view(APP, "lb-vm").unwrap();
        assert!(wait_for_status(&db, "/db-vm/mysql", InstanceStatus::DeployedStarted).await);
        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::DeployedStarted).await);
        assert!(wait_for_status(&lb, "/lb-vm/apache", InstanceStatus::DeployedStarted).await);

        for raw in ALL {
            let target = path(raw);
            assert!(
                eventually(|| dm.status(APP, &target) == Some(InstanceStatus::DeployedStarted)).await,
                "{raw} not started in the DM view"
            );
        }

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_undeploy_all_clears_every_machine() {
        let tmp = tempfile::tempdir().unwrap();
        let node = start_node(tmp.path(), &lamp_model()).await;
        let dm = node.dm();

        dm.deploy_and_start_all(APP).await.unwrap();
        let lb = node.agent_view(APP, "lb-vm").unwrap();
        assert!(wait_for_status(&lb, "/lb-vm/apache", InstanceStatus::DeployedStarted).await);

        dm.undeploy_all(APP).await.unwrap();
        for raw in ALL {
            let target = path(raw);
            assert!(
                eventually(|| dm.status(APP, &target) == Some(InstanceStatus::NotDeployed)).await,
                "{raw} still deployed in the DM view"
            );
        }
        let db = node.agent_view(APP, "db-vm").unwrap();
        assert!(wait_for_status(&db, "/db-vm/mysql", InstanceStatus::NotDeployed).await);
        assert!(!tmp.path().join("db-vm").join(APP).join("db-vm").join("mysql").exists());

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deliveries_are_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let node = start_node(tmp.path(), &lamp_model()).await;
        let dm = node.dm();

        dm.deploy_and_start_all(APP).await.unwrap();
        let web = node.agent_view(APP, "web-vm").unwrap();
        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::DeployedStarted).await);

        // Every delivery counts once on each side, so the totals balance.
        let mut sent = node.dm_stats().sent;
        let mut received = node.dm_stats().received;
        for root in ["db-vm", "web-vm", "lb-vm"] {
            let stats = node.agent_stats(APP, root).unwrap();
            sent += stats.sent;
            received += stats.received;
            assert_eq!(stats.failed_reception, 0);
            assert_eq!(stats.failed_sending, 0);
        }
        assert!(received > 0);
        assert_eq!(sent, received);
        assert_eq!(node.dm_stats().failed_reception, 0);

        let agent_stats = node.agent_stats(APP, "web-vm").unwrap();
        assert!(agent_stats.received > 0);
        assert!(agent_stats.last_received_ms > 0);
        assert!(web.processed() > 0);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_each_delivery_is_counted_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = node_config(tmp.path());
        config.agent.heartbeat_secs = 3600;
        let mut node = NodeRuntime::start(config).await.unwrap();
        node.add_application(&lamp_model()).await.unwrap();
        let dm = node.dm();
        for root in ["db-vm", "web-vm", "lb-vm"] {
            assert!(eventually(|| dm.machine(APP, root).is_some_and(|m| m.alive)).await);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let queue = MessageQueue::with_capacity(16);
        let client = InMemoryClient::with_queue(
            node.registry().clone(),
            OwnerProperties::agent("it", APP, "extra-vm"),
            &queue,
            false,
        );
        client.open_connection().await.unwrap();
        let before = node.dm_stats();

        let ctx = MessagingContext::for_dm("it", Some(APP));
        for i in 0..5 {
            client.publish(&ctx, Message::echo(format!("ping {i}"))).await.unwrap();
        }
        // Let the DM take and process all of them.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let after = node.dm_stats();
        assert_eq!(after.received - before.received, 5);
        assert_eq!(after.failed_reception, before.failed_reception);
        assert_eq!(queue.stats().snapshot().sent, 5);

        client.close_connection().await.unwrap();
        node.shutdown().await.unwrap();
    }
}
