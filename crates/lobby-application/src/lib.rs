//! Widget-level orchestration: the visit coordinator, the call and chat
//! controllers, the visibility watcher, and the assembly that wires them
//! to one widget instance.

pub mod call_controller;
pub mod chat_view;
pub mod visibility;
pub mod visit_coordinator;
pub mod widget;

pub use call_controller::{CallController, CallView};
pub use chat_view::{ChatView, ChatViewEvent};
pub use visibility::VisibilityWatcher;
pub use visit_coordinator::VisitCoordinator;
pub use widget::{EngagementWidget, WidgetDeps};
