fn main() -> anyhow::Result<()> {
    frame_labeler::cli::run()
}
