pub mod constants;
pub mod framer;
pub mod machine;
pub mod session;
pub mod types;
