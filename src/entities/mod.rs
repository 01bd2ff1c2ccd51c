pub mod customer;
pub mod customer_address;
pub mod document_line;
pub mod financial_document;
pub mod page_progress;
pub mod pricing_profile;
pub mod settlement_record;
pub mod sync_record;
pub mod territory;
