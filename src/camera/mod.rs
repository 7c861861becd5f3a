pub mod download;
pub mod driver;
pub mod gphoto_backend;
pub mod parser;
pub mod traits;

#[cfg(test)]
pub mod testing;
