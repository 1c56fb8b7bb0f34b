use std::fmt;

/// 一种抓取策略：端点 + 期望的响应格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    TabularExport,
    ChartTimeSeries,
    CommunityConversation,
    LegacyBoard,
    LegacyMessageDetail,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::TabularExport => "tabular-export",
            Strategy::ChartTimeSeries => "chart-time-series",
            Strategy::CommunityConversation => "community-conversation",
            Strategy::LegacyBoard => "legacy-board",
            Strategy::LegacyMessageDetail => "legacy-message-detail",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub symbol: String,
    pub strategy: Strategy,
    pub url: String,
    pub referer: String,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    HttpStatus(u16),
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { status: u16, bytes: usize },
    Failure(FailureKind),
}

/// 单次抓取的记录，只在内存中用于驱动回退状态机
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    pub symbol: String,
    pub strategy: Strategy,
    pub outcome: AttemptOutcome,
}

impl FetchAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }
}
