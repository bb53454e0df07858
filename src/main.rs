fn main() -> anyhow::Result<()> {
    micled::run()
}
