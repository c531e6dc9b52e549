mod job_run;
mod planner_continuity;
mod pool_roundtrip;
mod probing;
