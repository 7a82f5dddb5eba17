macro_rules! clone_params {
  ($($param:tt),*) => {
    ($($param.clone()),*)
  };
}

macro_rules! schedule_job {
  ($scheduler:ident, $job_name:expr, $job_schedule:expr, $job_fn:expr, $param:tt) => {
      use tokio_cron_scheduler::Job;

      let job_name = $job_name.to_string();
      let job_schedule = $job_schedule.to_string();
      tracing::info!("Scheduling job {} ({})", job_name, job_schedule);
      let $param = clone_params!($param);
      $scheduler
          .add(Job::new_async(job_schedule.as_str(), move |uuid, _l| {
              let $param = clone_params!($param);
              let job_name = job_name.clone();
              Box::pin(async move {
                  match $job_fn($param).await {
                      Ok(_) => {
                          tracing::info!("Job {} ({}) succeeded", job_name, uuid);
                      }
                      Err(e) => {
                          tracing::error!("Job {} failed: {:?}", job_name, e);
                      }
                  }
              })
          })?)
          .await?;
  };
}
