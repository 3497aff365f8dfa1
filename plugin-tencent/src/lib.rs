pub mod translator;

pub use translator::TencentTranslator;
