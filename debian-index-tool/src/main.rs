// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod cli;

#[tokio::main]
async fn main() {
    let exit_code = match cli::run_cli().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{:#?}", err);
            1
        }
    };

    std::process::exit(exit_code);
}
