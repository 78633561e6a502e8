// Orthogonal velocity control in body coordinates (forward-right-down):
// take off to 1 m, hover, fly forward at 0.5 m/s for 4 seconds, hover and land.

use std::process::ExitCode;

use automissions::Mission;

#[tokio::main]
async fn main() -> ExitCode {
    automissions_demos::run(Mission::forward()).await
}
