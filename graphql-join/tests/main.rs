mod common;

mod join_schema;
