fn main() {
    microscopy_pipeline::cli::run();
}
