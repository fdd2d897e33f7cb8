//! Prithvi locator - CLI entry point.

fn main() -> anyhow::Result<()> {
    prithvi_runner::run()
}
