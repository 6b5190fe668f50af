//! Operation pipeline, subscription lifecycle and event relay.
//!
//! 1. **Classification** (`classify`): request body -> `Result<Operation, ClassifyError>`
//! 2. **Middleware** (`middleware`): Tower layers (metrics, load-shedding)
//! 3. **Routing** (`router`): dispatch by `OperationKind`
//! 4. **Handlers**: `executor` (read/write), `subscription` (subscribe/teardown)
//! 5. **Relay** (`relay`): request and response envelopes between `dispatcher`,
//!    `transform` workers and `fanout`
//! 6. **Background workers** (`worker`): expired-record sweep

pub mod classify;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod fanout;
pub mod ingress;
pub mod middleware;
pub mod operation;
pub mod relay;
pub mod router;
pub mod subscription;
pub mod transform;
pub mod worker;

pub use classify::OperationClassifier;
pub use config::ServerConfig;
pub use dispatcher::WorkDispatcher;
pub use executor::OperationExecutor;
pub use fanout::{FanoutResult, NotificationFanout};
pub use ingress::OperationIngress;
pub use operation::{ClassifyError, Operation, OperationError, OperationResponse};
pub use relay::{EnvelopeHandler, EventRelay, EventRelayBuilder, Publisher};
pub use router::OperationRouter;
pub use subscription::{SubscriptionManager, TeardownReport};
pub use transform::{HttpTransformer, PassthroughTransformer, TransformWorker};
pub use worker::{BackgroundRunnable, BackgroundWorker, DirectorySweeper, SweepTask};
