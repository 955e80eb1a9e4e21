//! Kernel side of the widget: owns the association table and the
//! authoritative position, answers `UpMsg`s from the view.

use crate::associations::AssociationTable;
use serde_json::{Value, json};
use shared::{
    ASSOCIATIONS_VIEW_KEY, BUILD_KEY, DownMsg, KernelSection, POSITION_KEY, StateMap, UpMsg,
    Viewport,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("start position must be positive, got {start}")]
    NegativeStart { start: i64 },
    #[error("flank must not be negative, got {flank}")]
    NegativeFlank { flank: i64 },
    #[error("provide either `position`, or both `start` and `end`")]
    MissingBounds,
    #[error("association table is empty, cannot pick a top locus")]
    EmptyTable,
    #[error("no associations on chromosome '{0}'")]
    UnknownChromosome(String),
    #[error("invalid value for '{key}'")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode outgoing message")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where the plot should open, as given by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRequest {
    pub chrom: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub position: Option<i64>,
    pub flank: i64,
}

impl Default for PositionRequest {
    fn default() -> Self {
        Self {
            chrom: None,
            start: None,
            end: None,
            position: None,
            flank: KernelSection::default().flank,
        }
    }
}

/// Pick the opening viewport.
///
/// With a chromosome: `position` centres a `flank`-wide window, both bounds
/// are used as given, no bounds at all centres on that chromosome's top
/// locus. Without one the global top locus is used. Bounds never go below 1.
pub fn resolve_initial_position(
    table: &AssociationTable,
    request: &PositionRequest,
) -> Result<Viewport, KernelError> {
    if request.flank < 0 {
        return Err(KernelError::NegativeFlank {
            flank: request.flank,
        });
    }
    let viewport = match &request.chrom {
        Some(chrom) => match (request.position, request.start, request.end) {
            // Deliberately ahead of the top-locus rule: an explicit position
            // always wins, even though no start/end were given.
            (Some(position), _, _) => Viewport::centered(chrom.as_str(), position, request.flank),
            (None, None, None) => {
                let locus = table
                    .top_locus(Some(chrom.as_str()))
                    .ok_or_else(|| KernelError::UnknownChromosome(chrom.clone()))?;
                Viewport::centered(chrom.as_str(), locus.position, request.flank)
            }
            (None, Some(start), Some(end)) => Viewport::new(chrom.as_str(), start, end),
            (None, _, _) => return Err(KernelError::MissingBounds),
        },
        None => {
            let locus = table.top_locus(None).ok_or(KernelError::EmptyTable)?;
            Viewport::centered(locus.chr.as_str(), locus.position, request.flank)
        }
    };
    Ok(viewport.clamped_to(1))
}

pub fn validate_position(viewport: &Viewport) -> Result<(), KernelError> {
    if viewport.start < 0 {
        return Err(KernelError::NegativeStart {
            start: viewport.start,
        });
    }
    Ok(())
}

pub struct Kernel {
    table: AssociationTable,
    position: Viewport,
    build: String,
}

impl Kernel {
    pub fn new(
        table: AssociationTable,
        request: &PositionRequest,
        build: impl Into<String>,
    ) -> Result<Self, KernelError> {
        let position = resolve_initial_position(&table, request)?;
        log::info!(
            "kernel ready with {} associations at {}",
            table.len(),
            position
        );
        Ok(Self {
            table,
            position,
            build: build.into(),
        })
    }

    pub fn position(&self) -> &Viewport {
        &self.position
    }

    pub fn build(&self) -> &str {
        &self.build
    }

    /// Move to `viewport`. Returns whether it differed from the current one.
    pub fn set_position(&mut self, viewport: Viewport) -> Result<bool, KernelError> {
        validate_position(&viewport)?;
        if viewport == self.position {
            return Ok(false);
        }
        self.position = viewport;
        Ok(true)
    }

    fn associations_view(&self) -> Value {
        json!(self.table.view(&self.position))
    }

    /// Every synced key, as sent when the view first connects.
    pub fn initial_state(&self) -> StateMap {
        let mut state = StateMap::new();
        state.insert(BUILD_KEY.to_string(), json!(self.build));
        state.insert(POSITION_KEY.to_string(), self.position.to_value());
        state.insert(ASSOCIATIONS_VIEW_KEY.to_string(), self.associations_view());
        state
    }

    pub fn handle_up_msg(&mut self, up_msg: UpMsg) -> Vec<DownMsg> {
        match up_msg {
            UpMsg::RequestState => {
                log::debug!("sending full state");
                vec![DownMsg::StateUpdate {
                    state: self.initial_state(),
                }]
            }
            UpMsg::StateUpdate(state) => {
                let mut replies = Vec::new();
                for (key, value) in state {
                    self.apply_key(&key, value, &mut replies);
                }
                replies
            }
        }
    }

    fn apply_key(&mut self, key: &str, value: Value, replies: &mut Vec<DownMsg>) {
        match key {
            POSITION_KEY => {
                let accepted = serde_json::from_value::<Viewport>(value)
                    .map_err(|source| KernelError::Decode {
                        key: key.to_string(),
                        source,
                    })
                    .and_then(|viewport| self.set_position(viewport));
                match accepted {
                    Ok(true) => {
                        log::debug!("position changed to {}", self.position);
                        let mut state = StateMap::new();
                        state.insert(ASSOCIATIONS_VIEW_KEY.to_string(), self.associations_view());
                        replies.push(DownMsg::StateUpdate { state });
                    }
                    Ok(false) => log::trace!("position unchanged at {}", self.position),
                    Err(error) => {
                        log::warn!("rejected position update: {}", error);
                        replies.push(DownMsg::ValidationError {
                            key: key.to_string(),
                            message: error.to_string(),
                        });
                        // Revert the view to the position still held here.
                        let mut state = StateMap::new();
                        state.insert(POSITION_KEY.to_string(), self.position.to_value());
                        replies.push(DownMsg::StateUpdate { state });
                    }
                }
            }
            BUILD_KEY => match value {
                Value::String(build) => self.build = build,
                other => log::warn!("ignoring non-string build {}", other),
            },
            _ => log::debug!("ignoring update of unsynced key '{}'", key),
        }
    }

    /// Serve newline-delimited JSON `UpMsg`s from `input` until it closes.
    ///
    /// The initial state goes out first. Lines that fail to parse are logged
    /// and skipped.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<(), KernelError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let initial = DownMsg::StateUpdate {
            state: self.initial_state(),
        };
        write_down_msg(&mut output, &initial).await?;

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            log::debug!("received: {}", line);

            let up_msg: UpMsg = match serde_json::from_str(&line) {
                Ok(up_msg) => up_msg,
                Err(error) => {
                    log::error!("parse error: {}", error);
                    continue;
                }
            };

            for down_msg in self.handle_up_msg(up_msg) {
                write_down_msg(&mut output, &down_msg).await?;
            }
        }
        log::info!("input closed, kernel stopping");
        Ok(())
    }
}

async fn write_down_msg<W: AsyncWrite + Unpin>(
    output: &mut W,
    down_msg: &DownMsg,
) -> Result<(), KernelError> {
    let mut line = serde_json::to_string(down_msg).map_err(KernelError::Encode)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AssociationTable {
        AssociationTable::from_json_str(
            r#"[
                {"chr": "1", "position": 1000000, "ref_allele": "A", "ALT": "G", "pvalue": 1e-3},
                {"chr": "1", "position": 1200000, "ref_allele": "C", "ALT": "T", "pvalue": 1e-9},
                {"chr": "2", "position": 100, "ref_allele": "G", "ALT": "A", "log_pvalue": 20.0}
            ]"#,
        )
        .unwrap()
    }

    fn request(chrom: Option<&str>) -> PositionRequest {
        PositionRequest {
            chrom: chrom.map(str::to_string),
            ..PositionRequest::default()
        }
    }

    fn kernel() -> Kernel {
        let request = PositionRequest {
            chrom: Some("1".to_string()),
            start: Some(900_000),
            end: Some(1_100_000),
            ..PositionRequest::default()
        };
        Kernel::new(table(), &request, "GRCh38").unwrap()
    }

    fn position_update(viewport: Value) -> UpMsg {
        let mut state = StateMap::new();
        state.insert(POSITION_KEY.to_string(), viewport);
        UpMsg::StateUpdate(state)
    }

    #[test]
    fn no_chromosome_centres_on_global_top_locus() {
        let viewport = resolve_initial_position(&table(), &request(None)).unwrap();
        // 100 - 250000 clamps to 1.
        assert_eq!(viewport, Viewport::new("2", 1, 250_100));
    }

    #[test]
    fn chromosome_alone_centres_on_its_top_locus() {
        let viewport = resolve_initial_position(&table(), &request(Some("1"))).unwrap();
        assert_eq!(viewport, Viewport::new("1", 950_000, 1_450_000));
    }

    #[test]
    fn position_centres_with_flank() {
        let request = PositionRequest {
            position: Some(2_000_000),
            flank: 1_000,
            ..request(Some("3"))
        };
        let viewport = resolve_initial_position(&table(), &request).unwrap();
        assert_eq!(viewport, Viewport::new("3", 1_999_500, 2_000_500));
    }

    #[test]
    fn extreme_position_saturates_instead_of_overflowing() {
        let request = PositionRequest {
            position: Some(i64::MAX),
            ..request(Some("1"))
        };
        let viewport = resolve_initial_position(&table(), &request).unwrap();
        assert_eq!(viewport, Viewport::new("1", i64::MAX - 250_000, i64::MAX));
    }

    #[test]
    fn negative_flank_is_rejected() {
        let request = PositionRequest {
            position: Some(1_000),
            flank: -10,
            ..request(Some("1"))
        };
        assert!(matches!(
            resolve_initial_position(&table(), &request),
            Err(KernelError::NegativeFlank { flank: -10 })
        ));
    }

    #[test]
    fn single_bound_is_rejected() {
        let request = PositionRequest {
            start: Some(10),
            ..request(Some("1"))
        };
        assert!(matches!(
            resolve_initial_position(&table(), &request),
            Err(KernelError::MissingBounds)
        ));
    }

    #[test]
    fn unknown_chromosome_and_empty_table_fail() {
        assert!(matches!(
            resolve_initial_position(&table(), &request(Some("Y"))),
            Err(KernelError::UnknownChromosome(chrom)) if chrom == "Y"
        ));
        assert!(matches!(
            resolve_initial_position(&AssociationTable::default(), &request(None)),
            Err(KernelError::EmptyTable)
        ));
    }

    #[test]
    fn initial_state_slices_current_position() {
        let kernel = kernel();
        let state = kernel.initial_state();

        assert_eq!(state[BUILD_KEY], json!("GRCh38"));
        assert_eq!(state[POSITION_KEY], json!({"chr": "1", "start": 900000, "end": 1100000}));
        assert_eq!(
            state[ASSOCIATIONS_VIEW_KEY]["data"]["variant"],
            json!(["1:1000000_A/G"])
        );
        assert_eq!(state[ASSOCIATIONS_VIEW_KEY]["range"], state[POSITION_KEY]);
    }

    #[test]
    fn changed_position_recomputes_view() {
        let mut kernel = kernel();
        let replies = kernel.handle_up_msg(position_update(
            json!({"chr": "1", "start": 1_100_000, "end": 1_300_000}),
        ));

        assert_eq!(replies.len(), 1);
        let DownMsg::StateUpdate { state } = &replies[0] else {
            panic!("expected state update, got {:?}", replies[0]);
        };
        assert_eq!(
            state[ASSOCIATIONS_VIEW_KEY]["data"]["variant"],
            json!(["1:1200000_C/T"])
        );
        assert!(!state.contains_key(POSITION_KEY));
    }

    #[test]
    fn build_update_is_kept_and_resent() {
        let mut kernel = kernel();
        let mut state = StateMap::new();
        state.insert(BUILD_KEY.to_string(), json!("GRCh37"));

        assert!(kernel.handle_up_msg(UpMsg::StateUpdate(state)).is_empty());
        assert_eq!(kernel.build(), "GRCh37");
        assert_eq!(kernel.initial_state()[BUILD_KEY], json!("GRCh37"));
    }

    #[test]
    fn unchanged_position_sends_nothing() {
        let mut kernel = kernel();
        let current = kernel.position().to_value();
        assert!(kernel.handle_up_msg(position_update(current)).is_empty());
    }

    #[test]
    fn negative_start_is_rejected_and_position_resent() {
        let mut kernel = kernel();
        let before = kernel.position().clone();

        let replies =
            kernel.handle_up_msg(position_update(json!({"chr": "1", "start": -5, "end": 10})));

        assert_eq!(kernel.position(), &before);
        assert!(matches!(
            &replies[0],
            DownMsg::ValidationError { key, message }
                if key == POSITION_KEY && message.contains("must be positive")
        ));
        assert_eq!(
            replies[1],
            DownMsg::StateUpdate {
                state: StateMap::from_iter([(POSITION_KEY.to_string(), before.to_value())])
            }
        );
    }

    #[test]
    fn unknown_chromosome_update_gives_empty_view() {
        let mut kernel = kernel();
        let replies =
            kernel.handle_up_msg(position_update(json!({"chr": "MT", "start": 1, "end": 2})));
        let DownMsg::StateUpdate { state } = &replies[0] else {
            panic!("expected state update");
        };
        assert_eq!(state[ASSOCIATIONS_VIEW_KEY]["data"], json!({}));
    }

    #[tokio::test]
    async fn run_writes_initial_state_then_answers_each_line() {
        let mut kernel = kernel();
        let input = concat!(
            "{\"method\":\"request_state\"}\n",
            "not json\n",
            "\n",
            r#"{"method":"state_update","state":{"position":{"chr":"2","start":1,"end":500}}}"#,
            "\n",
        );
        let mut output = Vec::new();

        kernel.run(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<DownMsg> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], lines[1]);
        assert_eq!(kernel.position(), &Viewport::new("2", 1, 500));
    }
}
