//! 任务轮询
//!
//! 固定间隔查询任务状态, 直到结果可用、任务失败、超时或被用户中断

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::{error::Error, utils::pause_gate::PauseGate};

use super::client::JobStatus;

/// 默认轮询间隔
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 任务状态来源, 便于在测试中替换真实客户端
pub trait JobStatusSource {
    fn job_status(&mut self, token: &str, job_id: &str) -> Result<JobStatus, Error>;
}

/// 取消信号, 轮询循环每轮检查一次
pub trait CancelSignal {
    fn should_stop(&self) -> bool;

    /// 取消被观察到之后复位信号源
    fn acknowledge(&self);
}

impl CancelSignal for PauseGate {
    fn should_stop(&self) -> bool {
        PauseGate::should_stop(self)
    }

    fn acknowledge(&self) {
        self.reset();
    }
}

pub struct JobPoller<S> {
    source: S,
    interval: Duration,
}

impl<S> JobPoller<S>
where
    S: JobStatusSource,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            interval: POLL_INTERVAL,
        }
    }

    pub fn with_interval(source: S, interval: Duration) -> Self {
        Self { source, interval }
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// 等待任务结果图片地址
    ///
    /// 超时判定在每次查询前进行, 包括轮询间隔睡眠之后;
    /// 预算耗尽后不再发起查询, 返回 [`Error::JobTimeout`].
    /// 查询失败视为瞬态错误, 记录后继续下一轮
    pub fn wait_for_result(
        &mut self,
        token: &str,
        job_id: &str,
        timeout: Duration,
        cancel: &dyn CancelSignal,
    ) -> Result<String, Error> {
        let start = Instant::now();
        let mut first = true;

        while start.elapsed() < timeout {
            if cancel.should_stop() {
                cancel.acknowledge();
                return Err(Error::Interrupted);
            }
            if !first {
                std::thread::sleep(self.interval);
                // 睡眠可能越过截止点, 越过后不再发起查询
                if start.elapsed() >= timeout {
                    break;
                }
            }
            first = false;

            match self.source.job_status(token, job_id) {
                Ok(status) => {
                    if status.is_failed() {
                        let reason = status.error.unwrap_or_else(|| "unknown".to_string());
                        return Err(Error::JobFailed(reason));
                    }
                    if let Some(url) = status.available_url() {
                        return Ok(url.to_string());
                    }
                    info!("job {job_id} status: {}", status.status);
                }
                Err(e) => warn!("job {job_id} status query failed, {e}"),
            }
        }

        Err(Error::JobTimeout(timeout.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::civitai::client::JobResult;

    /// 第 N 次查询返回可用结果
    struct AvailableOnNth {
        polls: usize,
        succeed_on: usize,
    }

    impl JobStatusSource for AvailableOnNth {
        fn job_status(&mut self, _token: &str, job_id: &str) -> Result<JobStatus, Error> {
            self.polls += 1;
            if self.polls >= self.succeed_on {
                Ok(JobStatus {
                    job_id: job_id.to_string(),
                    status: "Succeeded".to_string(),
                    error: None,
                    result: Some(JobResult {
                        available: true,
                        blob_url: Some(format!("https://img.example/{job_id}.png")),
                    }),
                })
            } else {
                Ok(JobStatus {
                    job_id: job_id.to_string(),
                    status: "Scheduled".to_string(),
                    ..Default::default()
                })
            }
        }
    }

    struct NeverAvailable {
        polls: usize,
    }

    impl JobStatusSource for NeverAvailable {
        fn job_status(&mut self, _token: &str, job_id: &str) -> Result<JobStatus, Error> {
            self.polls += 1;
            Ok(JobStatus {
                job_id: job_id.to_string(),
                status: "Scheduled".to_string(),
                ..Default::default()
            })
        }
    }

    struct AlwaysFailing;

    impl JobStatusSource for AlwaysFailing {
        fn job_status(&mut self, _token: &str, _job_id: &str) -> Result<JobStatus, Error> {
            Ok(JobStatus {
                job_id: "j-1".to_string(),
                status: "Failed".to_string(),
                error: Some("out of quota".to_string()),
                ..Default::default()
            })
        }
    }

    fn running_gate() -> PauseGate {
        let gate = PauseGate::new();
        gate.resume();
        gate
    }

    #[test]
    fn test_wait_for_result_returns_url() -> anyhow::Result<()> {
        let source = AvailableOnNth {
            polls: 0,
            succeed_on: 3,
        };
        let mut poller = JobPoller::with_interval(source, Duration::from_millis(1));
        let gate = running_gate();

        let url = poller.wait_for_result("tok", "j-1", Duration::from_secs(5), &gate)?;
        assert_eq!(url, "https://img.example/j-1.png");
        assert_eq!(poller.into_source().polls, 3);
        Ok(())
    }

    #[test]
    fn test_wait_for_result_times_out() {
        let source = NeverAvailable { polls: 0 };
        let mut poller = JobPoller::with_interval(source, Duration::from_millis(10));
        let gate = running_gate();

        let result = poller.wait_for_result("tok", "j-1", Duration::from_millis(35), &gate);
        assert!(matches!(result, Err(Error::JobTimeout(_))));
        // 35ms 预算、10ms 间隔: 第一次查询不睡眠, 之后每轮一次
        let polls = poller.into_source().polls;
        assert!((2..=4).contains(&polls), "unexpected poll count {polls}");
    }

    #[test]
    fn test_wait_for_result_never_polls_past_budget() {
        // 35ms 预算、10ms 间隔: 第 5 次查询将落在 ~40ms, 不允许发生,
        // 即使任务恰好在那一轮变为可用也必须按超时处理
        let source = AvailableOnNth {
            polls: 0,
            succeed_on: 5,
        };
        let mut poller = JobPoller::with_interval(source, Duration::from_millis(10));
        let gate = running_gate();

        let result = poller.wait_for_result("tok", "j-1", Duration::from_millis(35), &gate);
        assert!(matches!(result, Err(Error::JobTimeout(_))));
        assert!(poller.into_source().polls <= 4);
    }

    #[test]
    fn test_wait_for_result_reports_failure_reason() {
        let mut poller = JobPoller::with_interval(AlwaysFailing, Duration::from_millis(1));
        let gate = running_gate();

        let result = poller.wait_for_result("tok", "j-1", Duration::from_secs(5), &gate);
        match result {
            Err(Error::JobFailed(reason)) => assert_eq!(reason, "out of quota"),
            other => panic!("expected JobFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_for_result_stops_on_user_request() {
        let source = NeverAvailable { polls: 0 };
        let mut poller = JobPoller::with_interval(source, Duration::from_millis(1));
        let gate = PauseGate::new();
        gate.stop();

        let result = poller.wait_for_result("tok", "j-1", Duration::from_secs(5), &gate);
        assert!(matches!(result, Err(Error::Interrupted)));
        // 中断后闸门回到初始暂停态
        assert!(gate.is_paused());
        assert!(!gate.should_stop());
        // 停止请求在任何查询之前生效
        assert_eq!(poller.into_source().polls, 0);
    }
}
