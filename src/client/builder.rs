use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;

use super::{connection::Connection, Handler, Options, Shared, WebSocket};
use crate::{headers::HeaderProvider, scheduler::Scheduler, TokioScheduler};

/// Builder for a [`WebSocket`].
///
/// ```rust
/// use std::time::Duration;
/// use tickws::{HeaderTable, Options, TokioScheduler, WebSocket};
///
/// let ws = WebSocket::builder()
///     .with_options(Options::default().with_ping_timeout(Duration::from_secs(1)))
///     .with_scheduler(TokioScheduler::new().with_period(Duration::from_millis(5)))
///     .with_header_provider(HeaderTable::new())
///     .build(());
/// ```
#[derive(Default)]
pub struct WebSocketBuilder {
    options: Option<Options>,
    scheduler: Option<Arc<dyn Scheduler>>,
    header_provider: Option<Arc<dyn HeaderProvider>>,
    runtime: Option<Handle>,
}

impl WebSocketBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sets the connection options.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    /// Sets the scheduler that ticks the connection. Defaults to a [`TokioScheduler`].
    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Shares a scheduler between several connections.
    pub fn with_shared_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Sets the provider of extra request headers.
    pub fn with_header_provider(mut self, provider: impl HeaderProvider + 'static) -> Self {
        self.header_provider = Some(Arc::new(provider));
        self
    }

    /// Shares a header provider, such as a [`HeaderTable`](crate::HeaderTable) the application
    /// keeps updating.
    pub fn with_shared_header_provider(mut self, provider: Arc<dyn HeaderProvider>) -> Self {
        self.header_provider = Some(provider);
        self
    }

    /// Runs socket operations on `runtime`, so [`WebSocket::open`] may be called from outside
    /// it. The default scheduler ticks on the same runtime.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Creates the connection, in the `Closed` state.
    pub fn build(self, handler: impl Handler) -> WebSocket {
        let scheduler = self.scheduler.unwrap_or_else(|| {
            let scheduler = match &self.runtime {
                Some(runtime) => TokioScheduler::new().with_handle(runtime.clone()),
                None => TokioScheduler::new(),
            };
            Arc::new(scheduler)
        });

        WebSocket {
            shared: Arc::new(Shared {
                conn: Mutex::new(Connection::new(self.options.unwrap_or_default())),
                handler: Box::new(handler),
                scheduler,
                header_provider: self.header_provider,
                runtime: self.runtime,
            }),
        }
    }
}
