mod automation;
mod blocking;
pub mod consent;
mod discovery;
mod error;
mod page;
mod pool;

pub use automation::{ChromiumLauncher, ChromiumPage, ChromiumPageFactory, ChromiumSession};
pub use blocking::{is_tracker, BlockingProfile};
pub use discovery::{
    is_machine_readable, DiscoveredEndpoint, EndpointDiscovery, EndpointMatch, Observation,
};
pub use error::{BrowserError, BrowserResult};
pub use page::{BrowserPage, ObservedResponse, PageFactory, PageOptions, PageTraffic};
pub use pool::{BrowserSessionPool, RenderRequest, RenderedPage};
