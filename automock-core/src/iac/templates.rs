//! Embedded Terraform configuration for the two stacks this system
//! provisions.
//! These are plain string constants, not a templating pass — the only
//! per-deployment variation lives in `terraform.tfvars`, rendered by
//! [`super::tfvars`].

pub const MOCK_MAIN_TF: &str = r#"
variable "project_name" {
  type = string
}

variable "image" {
  type    = string
  default = "mockserver/mockserver:latest"
}

variable "desired_count" {
  type    = number
  default = 1
}

variable "cpu" {
  type    = number
  default = 256
}

variable "memory" {
  type    = number
  default = 512
}

variable "vpc_id" {
  type    = string
  default = ""
}

variable "subnet_ids" {
  type    = list(string)
  default = []
}

resource "aws_ecs_cluster" "this" {
  name = "${var.project_name}-mock"
}

resource "aws_ecs_task_definition" "this" {
  family                   = "${var.project_name}-mock"
  requires_compatibilities = ["FARGATE"]
  network_mode             = "awsvpc"
  cpu                      = var.cpu
  memory                   = var.memory
  container_definitions = jsonencode([
    {
      name  = "mock"
      image = var.image
      portMappings = [
        { containerPort = 1080, protocol = "tcp" }
      ]
    }
  ])
}

resource "aws_ecs_service" "this" {
  name            = "${var.project_name}-mock"
  cluster         = aws_ecs_cluster.this.id
  task_definition = aws_ecs_task_definition.this.arn
  desired_count   = var.desired_count
  launch_type     = "FARGATE"

  network_configuration {
    subnets = var.subnet_ids
  }
}
"#;

pub const MOCK_OUTPUTS_TF: &str = r#"
output "cluster_name" {
  value = aws_ecs_cluster.this.name
}

output "service_name" {
  value = aws_ecs_service.this.name
}

output "vpc_id" {
  value = var.vpc_id
}
"#;

pub const LOADTEST_MAIN_TF: &str = r#"
variable "project_name" {
  type = string
}

variable "image" {
  type    = string
  default = "locustio/locust:latest"
}

variable "worker_desired_count" {
  type    = number
  default = 1
}

variable "cpu" {
  type    = number
  default = 256
}

variable "memory" {
  type    = number
  default = 512
}

variable "vpc_id" {
  type    = string
  default = ""
}

variable "subnet_ids" {
  type    = list(string)
  default = []
}

variable "target_url" {
  type    = string
  default = ""
}

resource "aws_ecs_cluster" "this" {
  name = "${var.project_name}-loadtest"
}

resource "aws_ecs_task_definition" "master" {
  family                   = "${var.project_name}-loadtest-master"
  requires_compatibilities = ["FARGATE"]
  network_mode             = "awsvpc"
  cpu                      = var.cpu
  memory                   = var.memory
  container_definitions = jsonencode([
    {
      name    = "locust-master"
      image   = var.image
      command = ["--master", "--host", var.target_url]
    }
  ])
}

resource "aws_ecs_service" "master" {
  name            = "${var.project_name}-loadtest-master"
  cluster         = aws_ecs_cluster.this.id
  task_definition = aws_ecs_task_definition.master.arn
  desired_count   = 1
  launch_type     = "FARGATE"

  network_configuration {
    subnets = var.subnet_ids
  }
}

resource "aws_ecs_task_definition" "worker" {
  family                   = "${var.project_name}-loadtest-worker"
  requires_compatibilities = ["FARGATE"]
  network_mode             = "awsvpc"
  cpu                      = var.cpu
  memory                   = var.memory
  container_definitions = jsonencode([
    {
      name    = "locust-worker"
      image   = var.image
      command = ["--worker", "--master-host", aws_ecs_service.master.name]
    }
  ])
}

resource "aws_ecs_service" "worker" {
  name            = "${var.project_name}-loadtest-worker"
  cluster         = aws_ecs_cluster.this.id
  task_definition = aws_ecs_task_definition.worker.arn
  desired_count   = var.worker_desired_count
  launch_type     = "FARGATE"

  network_configuration {
    subnets = var.subnet_ids
  }
}
"#;

pub const LOADTEST_OUTPUTS_TF: &str = r#"
output "cluster_name" {
  value = aws_ecs_cluster.this.name
}

output "service_name" {
  value = aws_ecs_service.master.name
}

output "vpc_id" {
  value = var.vpc_id
}
"#;

/// Renders an S3 backend block wiring Terraform's remote state directly
/// to the project bucket at `key`, with `encrypt = true`. State never
/// touches local disk outside Terraform's own `init`; the bucket's
/// native object locking is the only mutual exclusion relied on across
/// concurrent IaC mutations.
pub fn render_backend_tf(bucket: &str, key: &str, region: &str) -> String {
    format!(
        r#"
terraform {{
  backend "s3" {{
    bucket  = "{bucket}"
    key     = "{key}"
    region  = "{region}"
    encrypt = true
  }}
}}
"#
    )
}
