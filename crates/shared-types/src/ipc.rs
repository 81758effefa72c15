//! # Message Catalog
//!
//! Every message exchanged between the DM and the agents.
//!
//! ## Families
//!
//! - `Notif*`: sent by agents to the DM.
//! - `Cmd*`: sent by the DM to an agent, or by agents to each other for
//!   import bookkeeping (`CmdAddImport`, `CmdRemoveImport`, `CmdRequestImport`).
//! - `Echo`: liveness check, answered with the same payload.
//!
//! Messages are immutable values: ownership moves to the destination on send.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entities::{InstancePath, InstanceSnapshot, InstanceStatus};

/// Named binary resources shipped with a first deployment.
pub type ResourceMap = BTreeMap<String, Vec<u8>>;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    // =========================================================================
    // NOTIFICATIONS (agent -> DM)
    // =========================================================================
    /// An instance reached a new status.
    NotifInstanceChanged {
        application: String,
        instance_path: InstancePath,
        status: InstanceStatus,
    },

    /// An instance was removed from the agent's model.
    NotifInstanceRemoved {
        application: String,
        instance_path: InstancePath,
    },

    /// Periodic liveness signal of an agent.
    NotifHeartbeat {
        application: String,
        root_instance: String,
        ip_address: Option<String>,
    },

    /// The machine hosting an agent went away.
    NotifMachineDown {
        application: String,
        root_instance: String,
    },

    /// An autonomic event raised by an agent's monitoring rules.
    NotifAutonomic {
        application: String,
        root_instance: String,
        event_name: String,
        event_info: Option<String>,
    },

    /// Log files gathered on an agent.
    NotifLogs {
        application: String,
        root_instance: String,
        #[serde_as(as = "BTreeMap<_, Bytes>")]
        logs: ResourceMap,
    },

    // =========================================================================
    // MODEL SYNCHRONISATION (DM -> agent)
    // =========================================================================
    /// Replace the agent's whole model by this root instance.
    CmdSetScopedInstance {
        root: InstanceSnapshot,
        #[serde(default)]
        external_exports: BTreeMap<String, String>,
    },

    /// Add an instance (and its children) under `parent_path`.
    CmdAddInstance {
        parent_path: InstancePath,
        instance: InstanceSnapshot,
    },

    /// Remove an instance and its subtree.
    CmdRemoveInstance { instance_path: InstancePath },

    /// Ask the agent to bring an instance to a new status.
    CmdChangeInstanceState {
        instance_path: InstancePath,
        new_status: InstanceStatus,
        #[serde(default)]
        #[serde_as(as = "BTreeMap<_, Bytes>")]
        resources: ResourceMap,
    },

    /// Ask the agent to report the status of every instance.
    CmdSendInstances,

    /// Ask the agent to send its log files.
    CmdGatherLogs,

    // =========================================================================
    // IMPORT BOOKKEEPING (agent <-> agent)
    // =========================================================================
    /// An instance exports (new values of) variables under `prefix`.
    CmdAddImport {
        application: String,
        prefix: String,
        exporting_path: String,
        exported_variables: BTreeMap<String, String>,
    },

    /// An instance stopped exporting the variables under `prefix`.
    CmdRemoveImport {
        application: String,
        prefix: String,
        exporting_path: String,
    },

    /// Ask every exporter of `prefix` to publish its variables again.
    CmdRequestImport { application: String, prefix: String },

    // =========================================================================
    // MISC
    // =========================================================================
    Echo { id: Uuid, content: String },
}

impl Message {
    /// Stable name of the message kind, for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotifInstanceChanged { .. } => "NotifInstanceChanged",
            Self::NotifInstanceRemoved { .. } => "NotifInstanceRemoved",
            Self::NotifHeartbeat { .. } => "NotifHeartbeat",
            Self::NotifMachineDown { .. } => "NotifMachineDown",
            Self::NotifAutonomic { .. } => "NotifAutonomic",
            Self::NotifLogs { .. } => "NotifLogs",
            Self::CmdSetScopedInstance { .. } => "CmdSetScopedInstance",
            Self::CmdAddInstance { .. } => "CmdAddInstance",
            Self::CmdRemoveInstance { .. } => "CmdRemoveInstance",
            Self::CmdChangeInstanceState { .. } => "CmdChangeInstanceState",
            Self::CmdSendInstances => "CmdSendInstances",
            Self::CmdGatherLogs => "CmdGatherLogs",
            Self::CmdAddImport { .. } => "CmdAddImport",
            Self::CmdRemoveImport { .. } => "CmdRemoveImport",
            Self::CmdRequestImport { .. } => "CmdRequestImport",
            Self::Echo { .. } => "Echo",
        }
    }

    /// New echo request.
    pub fn echo(content: impl Into<String>) -> Self {
        Self::Echo {
            id: Uuid::new_v4(),
            content: content.into(),
        }
    }

    /// Whether the message is a notification aimed at the DM.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.kind().starts_with("Notif")
    }
}
