//! Shared fixtures for the integration flows.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use shared_types::{Component, ImportedVariable, InstancePath, InstanceSnapshot, InstanceStatus};
use stackyard_runtime::agent::AgentView;
use stackyard_runtime::{ApplicationModel, NodeConfig, NodeRuntime};

pub const APP: &str = "lamp";

pub fn mysql() -> Component {
    Component::new("MySQL", "logger")
        .exports("MySQL.ip", Some("10.0.0.3"))
        .exports("MySQL.port", Some("3306"))
}

pub fn tomcat() -> Component {
    Component::new("Tomcat", "logger")
        .exports("Tomcat.port", Some("8080"))
        .imports(ImportedVariable::required("MySQL.ip"))
        .imports(ImportedVariable::required("MySQL.port"))
}

pub fn apache() -> Component {
    Component::new("Apache", "logger")
        .imports(ImportedVariable::required("Tomcat.port"))
}

pub fn vm() -> Component {
    Component::new("VM", "logger")
}

/// Three machines: a database, an application server and a load balancer.
pub fn lamp_model() -> ApplicationModel {
    ApplicationModel {
        name: APP.to_string(),
        external_exports: BTreeMap::new(),
        roots: vec![
            InstanceSnapshot::new("db-vm", vm()).with_child(InstanceSnapshot::new("mysql", mysql())),
            InstanceSnapshot::new("web-vm", vm()).with_child(InstanceSnapshot::new("tomcat", tomcat())),
            InstanceSnapshot::new("lb-vm", vm()).with_child(InstanceSnapshot::new("apache", apache())),
        ],
    }
}

/// Database and application server on the same machine.
pub fn single_machine_model() -> ApplicationModel {
    ApplicationModel {
        name: APP.to_string(),
        external_exports: BTreeMap::new(),
        roots: vec![InstanceSnapshot::new("vm", vm())
            .with_child(InstanceSnapshot::new("mysql", mysql()))
            .with_child(InstanceSnapshot::new("tomcat", tomcat()))],
    }
}

/// An application that exports `Invoicer.url` to other applications as
/// `Billing.url`.
pub fn billing_model() -> ApplicationModel {
    let invoicer = Component::new("Invoicer", "logger").exports("Invoicer.url", Some("http://billing:9000"));
    ApplicationModel {
        name: "billing".to_string(),
        external_exports: BTreeMap::from([("Invoicer.url".to_string(), "Billing.url".to_string())]),
        roots: vec![InstanceSnapshot::new("billing-vm", vm()).with_child(InstanceSnapshot::new("invoicer", invoicer))],
    }
}

/// An application importing `Billing.url` from another application.
pub fn shop_model() -> ApplicationModel {
    let shop = Component::new("Shop", "logger").imports(ImportedVariable::external("Billing.url"));
    ApplicationModel {
        name: "shop".to_string(),
        external_exports: BTreeMap::new(),
        roots: vec![InstanceSnapshot::new("shop-vm", vm()).with_child(InstanceSnapshot::new("shop", shop))],
    }
}

/// An application server alone, named `name`, with no database of its own.
pub fn lone_tomcat_model(name: &str) -> ApplicationModel {
    ApplicationModel {
        name: name.to_string(),
        external_exports: BTreeMap::new(),
        roots: vec![InstanceSnapshot::new("web-vm", vm()).with_child(InstanceSnapshot::new("tomcat", tomcat()))],
    }
}

pub fn node_config(resources: &Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.messaging.domain = "it".to_string();
    config.agent.resources_dir = resources.to_path_buf();
    config.agent.heartbeat_secs = 1;
    config
}

pub async fn start_node(resources: &Path, model: &ApplicationModel) -> NodeRuntime {
    let mut node = NodeRuntime::start(node_config(resources)).await.unwrap();
    node.add_application(model).await.unwrap();
    node
}

pub fn path(raw: &str) -> InstancePath {
    InstancePath::parse(raw).unwrap()
}

/// Poll `condition` for up to five seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub async fn wait_for_status(view: &AgentView, raw: &str, status: InstanceStatus) -> bool {
    let target = path(raw);
    eventually(|| view.status(&target) == Some(status)).await
}
