//! Game file formats that modules edit in place

pub mod string_table;
