use std::future::Future;

/// Run `future` to completion independently of whoever started it.
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future);
}
