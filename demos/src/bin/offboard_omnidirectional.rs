// Omnidirectional velocity control in body coordinates (forward-right-down):
// take off to 1.5 m, fly four diagonal legs climbing and descending, then four
// quarter circles while yawing at 22.5 deg/s, hover and land.

use std::process::ExitCode;

use automissions::Mission;

#[tokio::main]
async fn main() -> ExitCode {
    automissions_demos::run(Mission::omnidirectional()).await
}
