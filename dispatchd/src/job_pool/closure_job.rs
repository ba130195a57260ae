// SPDX-License-Identifier: MIT

use crate::job_pool::job::Job;

/// Adapts any `FnOnce` closure into a [`Job`], the closure's captures
/// standing in for the job argument.
pub struct ClosureJob {
    desc: String,
    body: Box<dyn FnOnce() + Send + 'static>,
}

impl ClosureJob {
    pub fn new(desc: impl Into<String>, body: impl FnOnce() + Send + 'static) -> Self {
        Self {
            desc: desc.into(),
            body: Box::new(body),
        }
    }

    pub fn boxed(desc: impl Into<String>, body: impl FnOnce() + Send + 'static) -> Box<dyn Job> {
        Box::new(Self::new(desc, body))
    }
}

impl Job for ClosureJob {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn run(self: Box<Self>) {
        (self.body)()
    }
}

/// Example usage
#[test]
pub fn example() {
    use crate::job_pool::job::JobPool;

    let pool = JobPool::new(1, 4).unwrap();

    pool.submit(ClosureJob::boxed("say hello", || {
        println!("Hello from a pool worker");
    }))
    .unwrap();

    pool.shutdown();
}
