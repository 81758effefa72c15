//! # Import Flows
//!
//! Exports resolve across machines and on a single machine, follow the
//! exporter's lifecycle, and are withdrawn when a machine goes down.
//! Between applications, only aliased exports travel.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shared_types::InstanceStatus;

    use crate::fixtures::{
        billing_model, eventually, lamp_model, lone_tomcat_model, path, shop_model,
        single_machine_model, start_node, wait_for_status, APP,
    };

    #[tokio::test]
    async fn test_importer_waits_for_late_exporter() {
        let tmp = tempfile::tempdir().unwrap();
        let node = start_node(tmp.path(), &lamp_model()).await;
        let dm = node.dm();

        for raw in ["/db-vm", "/db-vm/mysql", "/web-vm", "/web-vm/tomcat"] {
            dm.change_instance_state(APP, &path(raw), InstanceStatus::DeployedStopped)
                .await
                .unwrap();
        }
        for raw in ["/web-vm", "/web-vm/tomcat"] {
            dm.change_instance_state(APP, &path(raw), InstanceStatus::DeployedStarted)
                .await
                .unwrap();
        }

        let web = node.agent_view(APP, "web-vm").unwrap();
        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::Starting).await);

        for raw in ["/db-vm", "/db-vm/mysql"] {
            dm.change_instance_state(APP, &path(raw), InstanceStatus::DeployedStarted)
                .await
                .unwrap();
        }
        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::DeployedStarted).await);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_exporter_cascades_to_importers() {
        let tmp = tempfile::tempdir().unwrap();
        let node = start_node(tmp.path(), &lamp_model()).await;
        let dm = node.dm();

        dm.deploy_and_start_all(APP).await.unwrap();
        let web = node.agent_view(APP, "web-vm").unwrap();
        let lb = node.agent_view(APP, "lb-vm").unwrap();
        assert!(wait_for_status(&lb, "/lb-vm/apache", InstanceStatus::DeployedStarted).await);

        dm.change_instance_state(APP, &path("/db-vm/mysql"), InstanceStatus::DeployedStopped)
            .await
            .unwrap();
        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::Starting).await);
        assert!(wait_for_status(&lb, "/lb-vm/apache", InstanceStatus::Starting).await);

        dm.change_instance_state(APP, &path("/db-vm/mysql"), InstanceStatus::DeployedStarted)
            .await
            .unwrap();
        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::DeployedStarted).await);
        assert!(wait_for_status(&lb, "/lb-vm/apache", InstanceStatus::DeployedStarted).await);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_machine_down_withdraws_its_exports() {
        let tmp = tempfile::tempdir().unwrap();
        let mut node = start_node(tmp.path(), &lamp_model()).await;
        let dm = node.dm();

        dm.deploy_and_start_all(APP).await.unwrap();
        let web = node.agent_view(APP, "web-vm").unwrap();
        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::DeployedStarted).await);

        node.stop_agent(APP, "db-vm").await.unwrap();

        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::Starting).await);
        let mysql = path("/db-vm/mysql");
        assert!(eventually(|| dm.status(APP, &mysql) == Some(InstanceStatus::NotDeployed)).await);
        assert!(!dm.machine(APP, "db-vm").unwrap().alive);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_imports_resolve_on_one_machine() {
        let tmp = tempfile::tempdir().unwrap();
        let node = start_node(tmp.path(), &single_machine_model()).await;
        let dm = node.dm();

        dm.deploy_and_start_all(APP).await.unwrap();
        let vm = node.agent_view(APP, "vm").unwrap();
        assert!(wait_for_status(&vm, "/vm/mysql", InstanceStatus::DeployedStarted).await);
        assert!(wait_for_status(&vm, "/vm/tomcat", InstanceStatus::DeployedStarted).await);

        dm.change_instance_state(APP, &path("/vm/mysql"), InstanceStatus::DeployedStopped)
            .await
            .unwrap();
        assert!(wait_for_status(&vm, "/vm/tomcat", InstanceStatus::Starting).await);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_external_import_resolves_across_applications() {
        let tmp = tempfile::tempdir().unwrap();
        let mut node = start_node(tmp.path(), &shop_model()).await;
        node.add_application(&billing_model()).await.unwrap();
        let dm = node.dm();

        dm.deploy_and_start_all("shop").await.unwrap();
        let shop = node.agent_view("shop", "shop-vm").unwrap();
        assert!(wait_for_status(&shop, "/shop-vm/shop", InstanceStatus::Starting).await);

        dm.deploy_and_start_all("billing").await.unwrap();
        assert!(wait_for_status(&shop, "/shop-vm/shop", InstanceStatus::DeployedStarted).await);
        let target = path("/shop-vm/shop");
        assert!(eventually(|| dm.status("shop", &target) == Some(InstanceStatus::DeployedStarted)).await);

        dm.change_instance_state("billing", &path("/billing-vm/invoicer"), InstanceStatus::DeployedStopped)
            .await
            .unwrap();
        assert!(wait_for_status(&shop, "/shop-vm/shop", InstanceStatus::Starting).await);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_internal_exports_stay_in_their_application() {
        let tmp = tempfile::tempdir().unwrap();
        let mut node = start_node(tmp.path(), &lamp_model()).await;
        node.add_application(&lone_tomcat_model("lamp2")).await.unwrap();
        let dm = node.dm();

        dm.deploy_and_start_all("lamp2").await.unwrap();
        dm.deploy_and_start_all(APP).await.unwrap();

        let web = node.agent_view(APP, "web-vm").unwrap();
        let other = node.agent_view("lamp2", "web-vm").unwrap();
        assert!(wait_for_status(&web, "/web-vm/tomcat", InstanceStatus::DeployedStarted).await);
        assert!(wait_for_status(&other, "/web-vm/tomcat", InstanceStatus::Starting).await);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(other.status(&path("/web-vm/tomcat")), Some(InstanceStatus::Starting));

        node.shutdown().await.unwrap();
    }
}
