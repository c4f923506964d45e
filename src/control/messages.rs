//! Wire message definitions exchanged with the network simulator.
//!
//! Every inbound frame carries exactly one of `SimInit`, `ChannelStateRequest`
//! or `SimClose`; every reply carries exactly one of `SimAck` or
//! `ChannelStateResponse`. Enums are externally tagged, mirroring a
//! `oneof` wrapper.

use serde::{Deserialize, Serialize};

use crate::simulation::types::{ChannelStep, LegMode, NodeId, RandomVariable, SimTime, Vec3};

/// Inbound wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inbound {
    SimInit(SimInit),
    ChannelStateRequest(ChannelStateRequest),
    SimClose,
}

/// Outbound wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outbound {
    SimAck,
    ChannelStateResponse(ChannelStateResponse),
}

/// Session setup sent once by the network simulator before any channel request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimInit {
    /// Scene identifier, resolved relative to the scene directory.
    pub scene: String,
    /// 1 = P2P, 2 = P2MP, 3 = P2MP with look-ahead.
    pub mode: u8,
    /// Overrides the server's default parallelism degree when present.
    #[serde(default)]
    pub sub_mode: Option<u32>,
    /// Carrier frequency in MHz.
    pub frequency: f64,
    /// Channel bandwidth in MHz.
    pub channel_bw: f64,
    pub fft_size: u32,
    /// Subcarrier spacing in Hz.
    pub subcarrier_spacing: f64,
    /// Upper bound for the derived coherence time, in ms.
    pub min_coherence_time_ms: u64,
    pub seed: u64,
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    #[serde(flatten)]
    pub model: NodeModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeModel {
    ConstantPositionModel {
        position: Vec3,
    },
    RandomWalkModel {
        position: Vec3,
        mode: LegMode,
        speed: RandomVariable,
        direction: RandomVariable,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStateRequest {
    pub tx_node: NodeId,
    /// Receiver that must be part of the result set.
    pub rx_node: NodeId,
    /// Simulation time in nanoseconds.
    pub time: SimTime,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelStateResponse {
    pub csi: Vec<CsiStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsiStep {
    pub start_time: SimTime,
    pub end_time: SimTime,
    pub tx_node: NodeReport,
    pub rx_nodes: Vec<RxReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxReport {
    pub id: NodeId,
    pub position: Vec3,
    /// Propagation delay in ns.
    pub delay: SimTime,
    /// Wideband loss in dB.
    pub wb_loss: f64,
    /// Subcarrier offsets in Hz; empty when CSI estimation is off.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frequencies: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub csi_real: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub csi_imag: Vec<f64>,
}

impl From<Vec<ChannelStep>> for ChannelStateResponse {
    fn from(steps: Vec<ChannelStep>) -> Self {
        let csi = steps
            .into_iter()
            .map(|step| CsiStep {
                start_time: step.start_time,
                end_time: step.end_time,
                tx_node: NodeReport {
                    id: step.tx,
                    position: step.tx_position,
                },
                rx_nodes: step
                    .links
                    .into_iter()
                    .map(|link| {
                        let (frequencies, csi_real, csi_imag) = match link.csi {
                            Some(csi) => (csi.frequencies, csi.real, csi.imag),
                            None => (Vec::new(), Vec::new(), Vec::new()),
                        };
                        RxReport {
                            id: link.rx,
                            position: link.rx_position,
                            delay: link.delay,
                            wb_loss: link.loss_db,
                            frequencies,
                            csi_real,
                            csi_imag,
                        }
                    })
                    .collect(),
            })
            .collect();
        ChannelStateResponse { csi }
    }
}
