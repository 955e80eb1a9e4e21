use backend::{AssociationTable, Kernel, PositionRequest};
use frontend::connection::{ConnectionAdapter, handle_down_msg};
use frontend::model::widget_store;
use frontend::reconciler::RenderSurface;
use frontend::testing::FakeSurface;
use frontend::view::{ASSOCIATION_SOURCE, PanelState, PlotView};
use frontend::{ObservableStore, Origin};
use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use serde_json::json;
use shared::{BridgeConfig, DownMsg, POSITION_KEY, UpMsg, Viewport};
use std::sync::Arc;
use std::time::Duration;

const ROWS: &str = r#"[
    {"CHROM": "1", "POS": 1000000, "REF": "A", "ALT": "G", "P": 1e-3},
    {"CHROM": "1", "POS": 1200000, "REF": "C", "ALT": "T", "P": 1e-9},
    {"CHROM": "2", "POS": 5000, "REF": "G", "ALT": "A", "P": 1e-4}
]"#;

struct Session {
    kernel: Kernel,
    store: ObservableStore,
    surface: Arc<FakeSurface>,
    view: PlotView,
    up_msgs: UnboundedReceiver<UpMsg>,
}

fn open_session() -> Session {
    let config = BridgeConfig::default();
    let request = PositionRequest {
        chrom: Some("1".to_string()),
        start: Some(900_000),
        end: Some(1_100_000),
        ..PositionRequest::default()
    };
    let kernel = Kernel::new(
        AssociationTable::from_json_str(ROWS).unwrap(),
        &request,
        config.widget.build.clone(),
    )
    .unwrap();

    let store = widget_store(&config.widget);
    let (connection, up_msgs) = ConnectionAdapter::new();
    store.connect_transport(Arc::new(connection));
    handle_down_msg(
        DownMsg::StateUpdate {
            state: kernel.initial_state(),
        },
        &store,
    );

    let surface = Arc::new(FakeSurface::new(Viewport::default()));
    let view = PlotView::render(store.clone(), surface.clone(), &config).unwrap();

    Session {
        kernel,
        store,
        surface,
        view,
        up_msgs,
    }
}

impl Session {
    /// Deliver one flushed update to the kernel and apply its answers.
    async fn pump(&mut self) {
        let up_msg = self.up_msgs.next().await.unwrap();
        for down_msg in self.kernel.handle_up_msg(up_msg) {
            handle_down_msg(down_msg, &self.store);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn surface_opens_at_the_kernel_position() {
    let session = open_session();

    assert_eq!(session.surface.viewport(), *session.kernel.position());
    assert_eq!(session.surface.applied().len(), 1);
    assert_eq!(session.store.origin(POSITION_KEY), Some(Origin::Remote));

    let position = session.view.position_state().unwrap();
    let loaded = session.view.load_panel(ASSOCIATION_SOURCE, &position).await;
    let PanelState::Loaded(view) = loaded else {
        panic!("initial view should already be present");
    };
    assert_eq!(view["data"]["variant"], json!(["1:1000000_A/G"]));
}

#[tokio::test(start_paused = true)]
async fn panning_waits_for_the_matching_association_view() {
    let mut session = open_session();
    let panned = Viewport::new("1", 1_100_000, 1_300_000);
    session.surface.user_moved_to(panned.clone());

    let Session {
        kernel,
        store,
        view,
        up_msgs,
        ..
    } = &mut session;

    let kernel_side = async {
        // The kernel answers well after the plot starts asking.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let up_msg = up_msgs.next().await.unwrap();
        for down_msg in kernel.handle_up_msg(up_msg) {
            handle_down_msg(down_msg, store);
        }
    };
    let (fetched, ()) = tokio::join!(view.fetch(ASSOCIATION_SOURCE, &panned), kernel_side);

    let fetched = fetched.unwrap();
    assert_eq!(fetched["range"], panned.to_value());
    assert_eq!(fetched["data"]["variant"], json!(["1:1200000_C/T"]));
    assert_eq!(session.kernel.position(), &panned);
    assert!(!session.store.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn rejected_position_reverts_the_surface() {
    let mut session = open_session();
    let accepted = session.kernel.position().clone();

    session.surface.user_moved_to(Viewport::new("1", -5, 100));
    session.pump().await;

    assert_eq!(session.kernel.position(), &accepted);
    assert_eq!(session.surface.viewport(), accepted);
    assert_eq!(session.surface.applied().last(), Some(&accepted));
    assert!(!session.store.has_unsaved_changes());
}
