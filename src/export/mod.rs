//! Static reports built from the cache read interface.

mod archive;
mod html;
mod xls;

pub use archive::{IPS_EXTENSION, IpsArchive};
pub use html::{HtmlExporter, STYLE_CSS};
pub use xls::{DEFAULT_XLS_FILE_NAME, XlsExporter};
