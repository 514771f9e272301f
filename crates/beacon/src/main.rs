//! Binary entry point. All application logic lives in the library crate.

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lib_beacon::init().await
}
