use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    jrchat::cli::main()
}
