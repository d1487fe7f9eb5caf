use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use testfarm_core::{
    models::{SlaveCommand, SlaveHandshake, WorkerMessage},
    SchedulerError,
};
use testfarm_dispatcher::SchedulerHandle;

use crate::{
    error::{ApiError, ApiResult},
    routes::AppState,
};

/// Slave WebSocket 入口
///
/// 浏览器连接后发送的第一条文本消息必须是握手信息，之后的文本消息都按
/// [`WorkerMessage`] 解析后转交给调度器。
pub async fn slave_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_slave_socket(socket, state.scheduler).await {
            warn!("Slave连接异常结束: {}", e);
        }
    })
}

/// 解析握手消息
pub fn parse_handshake(text: &str) -> ApiResult<SlaveHandshake> {
    let handshake: SlaveHandshake = serde_json::from_str(text)?;
    if handshake.user_agent.trim().is_empty() {
        return Err(ApiError::BadRequest("握手信息缺少 userAgent".to_string()));
    }
    Ok(handshake)
}

async fn read_handshake(
    stream: &mut SplitStream<WebSocket>,
) -> ApiResult<Option<SlaveHandshake>> {
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => return parse_handshake(text.as_str()).map(Some),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

async fn send_command(
    sink: &mut SplitSink<WebSocket, Message>,
    command: &SlaveCommand,
) -> ApiResult<()> {
    let text = command.serialize()?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn handle_slave_socket(socket: WebSocket, scheduler: SchedulerHandle) -> ApiResult<()> {
    let (mut sink, mut stream) = socket.split();
    let Some(handshake) = read_handshake(&mut stream).await? else {
        debug!("Slave在握手前关闭了连接");
        return Ok(());
    };

    let (outbound, mut commands) = mpsc::unbounded_channel();
    let slave_id = match scheduler.connect_slave(handshake, outbound).await {
        Ok(slave_id) => slave_id,
        Err(SchedulerError::SlaveRejected(reason)) => {
            info!("Slave连接被拒绝: {}", reason);
            while let Ok(command) = commands.try_recv() {
                send_command(&mut sink, &command).await?;
            }
            let _ = sink.close().await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let writer = async {
        while let Some(command) = commands.recv().await {
            send_command(&mut sink, &command).await?;
            if command == SlaveCommand::Dispose {
                let _ = sink.close().await;
                break;
            }
        }
        Ok::<_, ApiError>(())
    };

    let reader = async {
        while let Some(message) = stream.next().await {
            match message? {
                Message::Text(text) => match WorkerMessage::parse(text.as_str()) {
                    Ok(message) => scheduler.slave_message(slave_id, message)?,
                    Err(e) => warn!("Slave {} 发送了无法解析的消息: {}", slave_id, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok::<_, ApiError>(())
    };

    let result = tokio::select! {
        result = writer => result,
        result = reader => result,
    };

    if let Err(e) = scheduler.disconnect_slave(slave_id) {
        debug!("通知Slave {} 断开失败: {}", slave_id, e);
    }
    result
}
