//! Client-facing wire protocol: the WebSocket message catalog (spec.md
//! §6.1) and the Pulse HTTP read surface DTOs (spec.md §6.2).

pub mod http;
pub mod ws;

pub use http::{
    DlqQuery, DlqResponse, LatencySeriesBucket, LatencySeriesQuery, LatencySeriesResponse,
    PipelineRunDetailResponse, PipelineRunsQuery, PipelineRunsResponse, ProviderCallsQuery,
    ProviderCallsResponse, StatsQuery, StatsResponse,
};
pub use ws::{PipelineMode, WsFrame, WsMessage, WsMetadata};
