use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub")]
pub enum Error {
    #[snafu(display("request to '{}' failed: {}", url, source))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("apiserver returned {}: {}", status, message))]
    ServerError { status: u16, message: String },
}
