pub mod composite;
pub mod html;
pub mod pdf;
pub mod plain_text;

pub use composite::CompositeExtractor;
pub use html::HtmlExtractor;
pub use pdf::PdfExtractor;
pub use plain_text::PlainTextExtractor;
