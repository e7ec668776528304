//! Page types and layout.
//!
//! This module contains:
//! - [`Page`] - The raw page-size data container
//! - [`PageHeader`] - Metadata at the start of every typed page
//! - [`PageType`] - Discriminator for different page formats

#[allow(clippy::module_inception)]
mod page;
mod page_header;

pub use page::{get_u16, get_u32, put_u16, put_u32, Page};
pub use page_header::{PageHeader, PageType};
