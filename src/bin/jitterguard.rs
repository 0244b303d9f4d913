use anyhow::Result;

fn main() -> Result<()> {
    jitterguard::cli::run()
}
