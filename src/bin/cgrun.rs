use anyhow::Result;

fn main() -> Result<()> {
    cgrun::cli::run()
}
