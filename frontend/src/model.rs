use crate::dataflow::ObservableStore;
use serde_json::json;
use shared::{ASSOCIATIONS_VIEW_KEY, BUILD_KEY, POSITION_KEY, StateMap, WidgetSection};

/// Initial widget state: build, position and an empty view covering it.
pub fn default_state(widget: &WidgetSection) -> StateMap {
    let mut state = StateMap::new();
    state.insert(BUILD_KEY.to_string(), json!(widget.build));
    state.insert(POSITION_KEY.to_string(), widget.position.to_value());
    state.insert(
        ASSOCIATIONS_VIEW_KEY.to_string(),
        json!({ "range": widget.position.to_value() }),
    );
    state
}

/// Store pre-populated with [`default_state`].
pub fn widget_store(widget: &WidgetSection) -> ObservableStore {
    ObservableStore::with_defaults(default_state(widget))
}
