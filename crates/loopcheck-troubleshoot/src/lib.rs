//! Troubleshooting flows built on the loopback prober: the bisection
//! controller that narrows down which extension breaks self-requests, and the
//! operator session lifecycle.
//!
//! Both talk to the host only through the traits in [`host`] and coordinate
//! with the bootstrap shim only through the persisted token store.

pub mod controller;
mod error;
pub mod host;
mod report;
pub mod session;

pub use controller::{BisectionController, CyclePhase};
pub use error::TroubleshootError;
pub use host::{
    ClientCookieJar, CookiePolicy, ExtensionRegistry, HostServices, InMemoryCookieJar,
    PermissionGate, SessionCookie, ShimProvisioner, StaticExtensionRegistry, StaticPermission,
};
pub use report::{
    ExtensionBisectionReport, ReportEntry, ReportEntryKind, Verdict, BASELINE_ENTRY_IDENTIFIER,
};
pub use session::{
    SessionLifecycle, SessionOrigin, SessionSnapshot, SessionStart, TroubleshootingSession,
};
