fn main() -> anyhow::Result<()> {
    tether_demo::run()
}
