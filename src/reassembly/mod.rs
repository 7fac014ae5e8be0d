//! Fragment and block-sequence reassembly.
//!
//! ## Components
//!
//! - [`ReassemblyTable`] - In-progress and reassembled tables for one protocol
//! - [`FragmentHead`] - State of one reassembly in progress
//! - [`FragmentList`] - Offset-sorted fragments with a first-gap cursor
//! - [`Reassembly`] - Immutable snapshot of a completed reassembly
//! - [`ReassemblyRegistry`] - Every table in use, reset together
//!
//! ## Operation families
//!
//! - Byte offsets: [`ReassemblyTable::add`], [`ReassemblyTable::add_check`] and variants
//! - Block sequences: [`ReassemblyTable::add_seq_check`], [`ReassemblyTable::add_seq_next`], ...
//! - Per-fragment sequence numbers: [`ReassemblyTable::add_seq_single`]
//!
//! The `*_check` variants move completed reassemblies out of the in-progress
//! table into a cache keyed by (frame, id). The plain variants leave the head
//! in place so later fragments, truncation and partial reassembly still apply.

mod defrag;
mod fragment;
mod head;
mod list;
mod registry;
mod result;
mod sequence;
mod single;
mod table;

pub use fragment::{Fragment, FragmentFlags, FragmentItem, FragmentSummary, HeadFlags};
pub use head::FragmentHead;
pub use list::FragmentList;
pub use registry::{ManagedTable, ReassemblyRegistry, TableId};
pub use result::{Reassembly, Rendered};
pub use single::SeqBoundary;
pub use table::{AddResult, ReassemblyTable, TableStats};
