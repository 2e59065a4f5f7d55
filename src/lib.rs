//! Fills the technical service report workbook from a report form.

pub mod assemble;
pub mod cell;
pub mod config;
pub mod error;
pub mod form;
pub mod imaging;
pub mod model;
pub mod package;
pub mod reference;
pub mod rules;
pub mod template;
#[cfg(test)]
mod test_support;
