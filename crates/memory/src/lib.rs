pub mod digest;
pub mod graph;
pub mod record;
pub mod update;
pub mod watch;

pub use digest::{Digest, DigestItem, Priority};
pub use graph::{Graph, Node, build, resolve_bank_dir};
pub use record::{Frontmatter, Value, decode, encode};
pub use update::{ALLOWED_STATUS, NodeChanges, UpdateError, apply_update};
pub use watch::{BankWatcher, watch_bank};
